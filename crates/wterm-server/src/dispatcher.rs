//! Per-connection session dispatcher.
//!
//! A connection starts out connecting: only `AUTH` frames reach the backend
//! and everything else is queued. Once the backend accepts, queued frames
//! are replayed in arrival order and the dispatcher serves shell and
//! filesystem sessions until the connection closes.

use crate::backend::{AuthChannel, AuthEvent, Backend, ShellSession};
use crate::fs_router::{FilePicker, FsRouter};
use crate::session::{Session, SessionTable};
use crate::transfer::TransferRegistry;
use crate::transport::{framer, FrameSender, Inbound};
use futures_util::{Sink, Stream};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use wterm_core::{
    ClientMessage, InfoDesc, ServerMessage, SessionKind, SizeDesc, WtermError, WtermResult,
    CONTROL_SESSION_ID,
};

/// Shell output is relayed in chunks of at most this many bytes.
const RELAY_CHUNK: usize = 32 * 1024;

/// Shared services a connection needs besides its backend.
#[derive(Clone, Default)]
pub struct ConnectionContext {
    pub transfers: Arc<TransferRegistry>,
    pub picker: Option<Arc<dyn FilePicker>>,
}

/// Serve one multiplexed connection until it closes.
///
/// Returns an error when the backend cannot start or authentication fails.
/// Every session still open at the end is closed exactly once.
pub async fn serve_connection<Si, St>(
    sink: Si,
    stream: St,
    backend: Arc<dyn Backend>,
    ctx: ConnectionContext,
) -> WtermResult<()>
where
    Si: Sink<Vec<u8>, Error = WtermError> + Send + Unpin + 'static,
    St: Stream<Item = WtermResult<Vec<u8>>> + Send + Unpin + 'static,
{
    let (sender, inbound, tasks) = framer::spawn(sink, stream);
    let closed = sender.close_signal().clone();

    let (auth, auth_rx) = AuthChannel::new();
    if let Err(e) = backend.connect(auth).await {
        warn!(error = %e, "backend connect failed");
        tasks.release().await;
        return Err(e);
    }

    let sessions = SessionTable::new();
    let router = FsRouter::new(
        sender.clone(),
        ctx.transfers,
        ctx.picker,
        backend.is_windows_path(),
    );
    let dispatcher = Dispatcher {
        sender,
        backend,
        sessions: sessions.clone(),
        router,
    };
    let task = tokio::spawn(dispatcher.run(inbound, auth_rx));

    closed.closed().await;

    let open = sessions.seal().await;
    if !open.is_empty() {
        debug!(count = open.len(), "closing remaining sessions");
    }
    for (session_id, session) in open {
        session.close(session_id).await;
    }
    tasks.release().await;

    match task.await {
        Ok(result) => result,
        Err(e) => Err(WtermError::Other(format!("dispatcher task failed: {e}"))),
    }
}

struct Dispatcher {
    sender: FrameSender,
    backend: Arc<dyn Backend>,
    sessions: SessionTable,
    router: FsRouter,
}

impl Dispatcher {
    async fn run(
        self,
        mut inbound: mpsc::Receiver<Inbound>,
        mut auth_rx: mpsc::UnboundedReceiver<AuthEvent>,
    ) -> WtermResult<()> {
        let result = self.serve(&mut inbound, &mut auth_rx).await;
        self.sender.close_signal().close();
        match result {
            Err(e) if e.is_connection_closed() => Ok(()),
            other => other,
        }
    }

    async fn serve(
        &self,
        inbound: &mut mpsc::Receiver<Inbound>,
        auth_rx: &mut mpsc::UnboundedReceiver<AuthEvent>,
    ) -> WtermResult<()> {
        let mut pending = VecDeque::new();
        if let Err(e) = self.authenticate(inbound, auth_rx, &mut pending).await {
            if !e.is_connection_closed() {
                warn!(error = %e, "authentication failed");
            }
            return Err(e);
        }
        info!(queued = pending.len(), "connection authenticated");

        while let Some(frame) = pending.pop_front() {
            self.dispatch(frame).await?;
        }

        let closed = self.sender.close_signal().clone();
        loop {
            let frame = tokio::select! {
                biased;
                _ = closed.closed() => return Ok(()),
                frame = inbound.recv() => frame,
            };
            match frame {
                Some(frame) => self.dispatch(frame).await?,
                None => return Ok(()),
            }
        }
    }

    /// Run the connecting state until the backend's verdict.
    async fn authenticate(
        &self,
        inbound: &mut mpsc::Receiver<Inbound>,
        auth_rx: &mut mpsc::UnboundedReceiver<AuthEvent>,
        pending: &mut VecDeque<Inbound>,
    ) -> WtermResult<()> {
        let closed = self.sender.close_signal().clone();
        loop {
            tokio::select! {
                biased;
                _ = closed.closed() => return Err(WtermError::ConnectionClosed),
                event = auth_rx.recv() => match event {
                    Some(AuthEvent::Question(question)) => {
                        debug!(%question, "asking client");
                        self.sender
                            .send(CONTROL_SESSION_ID, &ServerMessage::AuthQuestion(question))
                            .await?;
                    }
                    Some(AuthEvent::Resolved(true)) => return Ok(()),
                    Some(AuthEvent::Resolved(false)) => {
                        return Err(WtermError::AuthFailed("rejected by backend".into()));
                    }
                    None => {
                        return Err(WtermError::AuthFailed("backend gave no verdict".into()));
                    }
                },
                frame = inbound.recv() => match frame {
                    Some(Inbound { message: ClientMessage::Auth(desc), .. }) => {
                        if let Err(e) = self.backend.answer(desc).await {
                            warn!(error = %e, "backend rejected auth answer");
                        }
                    }
                    Some(frame) => pending.push_back(frame),
                    None => return Err(WtermError::ConnectionClosed),
                },
            }
        }
    }

    /// Handle one authenticated frame. Only a closed connection is an error.
    async fn dispatch(&self, frame: Inbound) -> WtermResult<()> {
        let session_id = frame.session_id;
        let result = match frame.message {
            ClientMessage::Auth(_) => {
                debug!(session_id, "ignoring AUTH after authentication");
                Ok(())
            }
            ClientMessage::NewSession { kind } => self.new_session(session_id, kind).await,
            ClientMessage::CloseSession => {
                if let Some(session) = self.sessions.remove(session_id).await {
                    session.close(session_id).await;
                }
                Ok(())
            }
            ClientMessage::TermData(data) => self.term_data(session_id, &data).await,
            ClientMessage::Resize(size) => {
                self.resize(session_id, size).await;
                Ok(())
            }
            ClientMessage::FsOperation(req) => match self.sessions.filesystem(session_id).await {
                Some(fs) => self.router.route(session_id, fs, req).await,
                None => Ok(()),
            },
        };
        match result {
            Err(e) if e.is_connection_closed() => Err(e),
            Err(e) => {
                warn!(session_id, error = %e, "handler failed");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    async fn new_session(&self, session_id: u16, raw_kind: u16) -> WtermResult<()> {
        if self.sessions.contains(session_id).await {
            warn!(session_id, "session id already in use");
            return self.reply_new_session(session_id, false).await;
        }
        let kind = match SessionKind::try_from(raw_kind) {
            Ok(kind) => kind,
            Err(e) => {
                warn!(session_id, error = %e, "cannot create session");
                return self.reply_new_session(session_id, false).await;
            }
        };

        let created = match kind {
            SessionKind::Shell => self.backend.new_shell(session_id).await.map(|shell| {
                let (gate_tx, gate_rx) = oneshot::channel();
                let relay = tokio::spawn(relay_shell_output(
                    session_id,
                    shell.clone(),
                    self.sender.clone(),
                    gate_rx,
                ));
                (Session::Shell { shell, relay }, Some(gate_tx))
            }),
            SessionKind::Filesystem => self
                .backend
                .new_filesystem(session_id)
                .await
                .map(|fs| (Session::Filesystem(fs), None)),
        };
        let (session, gate) = match created {
            Ok(created) => created,
            Err(e) => {
                warn!(session_id, ?kind, error = %e, "backend failed to create session");
                self.report(session_id, format!("[SESSION] {e}")).await?;
                return self.reply_new_session(session_id, false).await;
            }
        };

        let kind_name = session.kind();
        if let Err(session) = self.sessions.insert(session_id, session).await {
            // Torn down (or the id was taken) while the backend was working.
            session.close(session_id).await;
            return self.reply_new_session(session_id, false).await;
        }
        info!(session_id, kind = kind_name, "session opened");

        self.reply_new_session(session_id, true).await?;
        // Shell output may only follow the NEW_SESSION reply.
        if let Some(gate) = gate {
            let _ = gate.send(());
        }
        Ok(())
    }

    async fn reply_new_session(&self, session_id: u16, success: bool) -> WtermResult<()> {
        let msg = ServerMessage::NewSession {
            success,
            windows_path: success && self.backend.is_windows_path(),
        };
        self.sender.send(session_id, &msg).await
    }

    async fn term_data(&self, session_id: u16, data: &[u8]) -> WtermResult<()> {
        let Some(shell) = self.sessions.shell(session_id).await else {
            return Ok(());
        };
        if let Err(e) = shell.write(data).await {
            warn!(session_id, error = %e, "shell write failed");
            self.report(session_id, format!("[TERM] {e}")).await?;
        }
        Ok(())
    }

    /// Applied inline so consecutive resizes land in arrival order.
    async fn resize(&self, session_id: u16, size: SizeDesc) {
        let Some(shell) = self.sessions.shell(session_id).await else {
            return;
        };
        if let Err(e) = shell.resize(size.rows, size.cols).await {
            debug!(session_id, error = %e, "resize failed");
        }
    }

    /// Errors go out on the control session; `session_id` is only logged.
    async fn report(&self, session_id: u16, text: String) -> WtermResult<()> {
        debug!(session_id, %text, "reporting error");
        self.sender
            .send(CONTROL_SESSION_ID, &ServerMessage::Info(InfoDesc::error(text)))
            .await
    }
}

/// Copy shell output to the socket once the session reply has gone out.
async fn relay_shell_output(
    session_id: u16,
    shell: Arc<dyn ShellSession>,
    sender: FrameSender,
    gate: oneshot::Receiver<()>,
) {
    if gate.await.is_err() {
        return;
    }
    let mut buf = vec![0u8; RELAY_CHUNK];
    loop {
        match shell.read(&mut buf).await {
            Ok(0) => {
                debug!(session_id, "shell output ended");
                break;
            }
            Ok(n) => {
                let msg = ServerMessage::TermData(buf[..n].to_vec());
                if let Err(e) = sender.send(session_id, &msg).await {
                    debug!(session_id, error = %e, "stopping shell relay");
                    break;
                }
            }
            Err(e) => {
                debug!(session_id, error = %e, "shell read failed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FileWriter, FilesystemSession, FsBase, FsEntry, OpenedFile};
    use crate::transport::framer::loopback::{self, Loopback};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::task::JoinHandle;
    use wterm_core::{AuthDesc, FsOp, FsRequest};

    #[derive(Clone, Copy, PartialEq)]
    enum AuthMode {
        Accept,
        Reject,
        Drop,
        Password,
    }

    struct MockShell {
        output: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
        writes: Mutex<Vec<u8>>,
        resizes: Mutex<Vec<(u16, u16)>>,
        closes: AtomicUsize,
    }

    #[async_trait]
    impl ShellSession for MockShell {
        async fn read(&self, buf: &mut [u8]) -> WtermResult<usize> {
            match self.output.lock().await.recv().await {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None => Ok(0),
            }
        }
        async fn write(&self, data: &[u8]) -> WtermResult<()> {
            self.writes.lock().unwrap().extend_from_slice(data);
            Ok(())
        }
        async fn resize(&self, rows: u16, cols: u16) -> WtermResult<()> {
            self.resizes.lock().unwrap().push((rows, cols));
            Ok(())
        }
        async fn close(&self) -> WtermResult<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockFs {
        closes: AtomicUsize,
    }

    #[async_trait]
    impl FsBase for MockFs {
        async fn read_dir(&self, _: &str) -> WtermResult<Vec<FsEntry>> {
            Ok(Vec::new())
        }
        async fn mkdir(&self, _: &str, _: u32) -> WtermResult<()> {
            Ok(())
        }
        async fn remove(&self, _: &str) -> WtermResult<()> {
            Ok(())
        }
        async fn rename(&self, _: &str, _: &str) -> WtermResult<()> {
            Ok(())
        }
        async fn open_read(&self, _: &str) -> WtermResult<OpenedFile> {
            Err(WtermError::Other("unsupported".into()))
        }
        async fn open_write(&self, _: &str, _: u32) -> WtermResult<FileWriter> {
            Err(WtermError::Other("unsupported".into()))
        }
    }

    #[async_trait]
    impl FilesystemSession for MockFs {
        fn as_base(&self) -> &dyn FsBase {
            self
        }
        async fn sub_volume(&self, _: &str) -> WtermResult<Arc<dyn FsBase>> {
            Err(WtermError::Volume("none".into()))
        }
        async fn getwd(&self) -> WtermResult<String> {
            Ok("/home/mock".into())
        }
        async fn close(&self) -> WtermResult<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct MockBackend {
        mode: AuthMode,
        windows: bool,
        fail_shell: bool,
        initial_output: Vec<u8>,
        pending: Mutex<Option<AuthChannel>>,
        shells: Mutex<Vec<Arc<MockShell>>>,
        output_feeds: Mutex<Vec<mpsc::UnboundedSender<Vec<u8>>>>,
        filesystems: Mutex<Vec<Arc<MockFs>>>,
        creations: AtomicUsize,
    }

    impl MockBackend {
        fn new(mode: AuthMode) -> Self {
            Self {
                mode,
                windows: false,
                fail_shell: false,
                initial_output: Vec::new(),
                pending: Mutex::new(None),
                shells: Mutex::new(Vec::new()),
                output_feeds: Mutex::new(Vec::new()),
                filesystems: Mutex::new(Vec::new()),
                creations: AtomicUsize::new(0),
            }
        }

        fn shell(&self, i: usize) -> Arc<MockShell> {
            self.shells.lock().unwrap()[i].clone()
        }

        fn filesystem(&self, i: usize) -> Arc<MockFs> {
            self.filesystems.lock().unwrap()[i].clone()
        }
    }

    #[async_trait]
    impl Backend for MockBackend {
        async fn connect(&self, auth: AuthChannel) -> WtermResult<()> {
            match self.mode {
                AuthMode::Accept => auth.accept(),
                AuthMode::Reject => auth.reject(),
                AuthMode::Drop => drop(auth),
                AuthMode::Password => {
                    auth.ask("password");
                    *self.pending.lock().unwrap() = Some(auth);
                }
            }
            Ok(())
        }

        async fn answer(&self, desc: AuthDesc) -> WtermResult<()> {
            let auth = self.pending.lock().unwrap().take();
            if let Some(auth) = auth {
                if desc.password == "pw" {
                    auth.accept();
                } else {
                    auth.reject();
                }
            }
            Ok(())
        }

        async fn new_shell(&self, _: u16) -> WtermResult<Arc<dyn ShellSession>> {
            self.creations.fetch_add(1, Ordering::SeqCst);
            if self.fail_shell {
                return Err(WtermError::Backend("no pty".into()));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            if !self.initial_output.is_empty() {
                tx.send(self.initial_output.clone()).unwrap();
            }
            let shell = Arc::new(MockShell {
                output: tokio::sync::Mutex::new(rx),
                writes: Mutex::new(Vec::new()),
                resizes: Mutex::new(Vec::new()),
                closes: AtomicUsize::new(0),
            });
            self.shells.lock().unwrap().push(shell.clone());
            self.output_feeds.lock().unwrap().push(tx);
            Ok(shell)
        }

        async fn new_filesystem(&self, _: u16) -> WtermResult<Arc<dyn FilesystemSession>> {
            self.creations.fetch_add(1, Ordering::SeqCst);
            let fs = Arc::new(MockFs::default());
            self.filesystems.lock().unwrap().push(fs.clone());
            Ok(fs)
        }

        fn is_windows_path(&self) -> bool {
            self.windows
        }
    }

    const SHELL: u16 = SessionKind::Shell as u16;
    const FILESYSTEM: u16 = SessionKind::Filesystem as u16;

    fn start(backend: Arc<MockBackend>) -> (Loopback, JoinHandle<WtermResult<()>>) {
        let (peer, sink, stream) = loopback::socket();
        let task = tokio::spawn(serve_connection(
            sink,
            stream,
            backend,
            ConnectionContext::default(),
        ));
        (peer, task)
    }

    fn getwd() -> ClientMessage {
        ClientMessage::FsOperation(FsRequest::new(FsOp::Getwd, Vec::new()))
    }

    fn opened(success: bool, windows_path: bool) -> ServerMessage {
        ServerMessage::NewSession {
            success,
            windows_path,
        }
    }

    /// An unknown-kind request always gets a failure reply, so seeing it
    /// proves every earlier frame has been handled.
    async fn barrier(peer: &mut Loopback) {
        peer.send(999, &ClientMessage::NewSession { kind: 77 });
        assert_eq!(peer.recv().await, Some((999, opened(false, false))));
    }

    #[tokio::test]
    async fn pre_auth_frames_replay_before_later_frames() {
        let backend = Arc::new(MockBackend::new(AuthMode::Password));
        let (mut peer, _task) = start(backend.clone());

        peer.send(1, &ClientMessage::NewSession { kind: FILESYSTEM });
        peer.send(1, &getwd());
        assert_eq!(
            peer.recv().await,
            Some((0, ServerMessage::AuthQuestion("password".into())))
        );

        peer.send(
            0,
            &ClientMessage::Auth(AuthDesc {
                question: "password".into(),
                password: "pw".into(),
                saved: false,
            }),
        );
        peer.send(1, &ClientMessage::CloseSession);
        peer.send(1, &getwd());

        assert_eq!(peer.recv().await, Some((1, opened(true, false))));
        assert_eq!(
            peer.recv().await,
            Some((
                1,
                ServerMessage::FsResult {
                    op: FsOp::Getwd,
                    value: serde_json::json!("/home/mock")
                }
            ))
        );
        // The post-auth GETWD hits a closed session and produces nothing.
        barrier(&mut peer).await;
        assert_eq!(backend.filesystem(0).closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_auth_closes_connection() {
        let backend = Arc::new(MockBackend::new(AuthMode::Reject));
        let (mut peer, task) = start(backend.clone());
        peer.send(1, &ClientMessage::NewSession { kind: SHELL });

        assert_eq!(peer.recv().await, None);
        let result = task.await.unwrap();
        assert!(matches!(result, Err(WtermError::AuthFailed(_))));
        assert_eq!(backend.creations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn wrong_password_closes_connection() {
        let backend = Arc::new(MockBackend::new(AuthMode::Password));
        let (mut peer, task) = start(backend);
        peer.recv().await.unwrap();
        peer.send(
            0,
            &ClientMessage::Auth(AuthDesc {
                question: "password".into(),
                password: "nope".into(),
                saved: false,
            }),
        );
        assert_eq!(peer.recv().await, None);
        assert!(task.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn dropped_auth_channel_counts_as_rejection() {
        let backend = Arc::new(MockBackend::new(AuthMode::Drop));
        let (mut peer, task) = start(backend);
        assert_eq!(peer.recv().await, None);
        assert!(matches!(task.await.unwrap(), Err(WtermError::AuthFailed(_))));
    }

    #[tokio::test]
    async fn duplicate_session_id_skips_backend() {
        let mut backend = MockBackend::new(AuthMode::Accept);
        backend.windows = true;
        let backend = Arc::new(backend);
        let (mut peer, _task) = start(backend.clone());

        peer.send(4, &ClientMessage::NewSession { kind: FILESYSTEM });
        assert_eq!(peer.recv().await, Some((4, opened(true, true))));
        peer.send(4, &ClientMessage::NewSession { kind: SHELL });
        assert_eq!(peer.recv().await, Some((4, opened(false, false))));
        assert_eq!(backend.creations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_session_kind_fails_without_backend_call() {
        let backend = Arc::new(MockBackend::new(AuthMode::Accept));
        let (mut peer, _task) = start(backend.clone());
        barrier(&mut peer).await;
        assert_eq!(backend.creations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn backend_failure_reports_and_replies_false() {
        let mut backend = MockBackend::new(AuthMode::Accept);
        backend.fail_shell = true;
        let (mut peer, _task) = start(Arc::new(backend));

        peer.send(2, &ClientMessage::NewSession { kind: SHELL });
        let Some((0, ServerMessage::Info(info))) = peer.recv().await else {
            panic!("expected INFO");
        };
        assert_eq!(info.info, "[SESSION] backend error: no pty");
        assert_eq!(peer.recv().await, Some((2, opened(false, false))));
        // The connection is still usable.
        barrier(&mut peer).await;
    }

    #[tokio::test]
    async fn shell_output_follows_session_reply() {
        let mut backend = MockBackend::new(AuthMode::Accept);
        backend.initial_output = b"$ ".to_vec();
        let backend = Arc::new(backend);
        let (mut peer, _task) = start(backend.clone());

        peer.send(3, &ClientMessage::NewSession { kind: SHELL });
        assert_eq!(peer.recv().await, Some((3, opened(true, false))));
        assert_eq!(
            peer.recv().await,
            Some((3, ServerMessage::TermData(b"$ ".to_vec())))
        );

        backend.output_feeds.lock().unwrap()[0]
            .send(b"more".to_vec())
            .unwrap();
        assert_eq!(
            peer.recv().await,
            Some((3, ServerMessage::TermData(b"more".to_vec())))
        );
    }

    #[tokio::test]
    async fn term_data_and_resize_reach_the_shell() {
        let backend = Arc::new(MockBackend::new(AuthMode::Accept));
        let (mut peer, _task) = start(backend.clone());

        peer.send(1, &ClientMessage::NewSession { kind: SHELL });
        peer.recv().await.unwrap();
        peer.send(1, &ClientMessage::TermData(b"ls\r".to_vec()));
        peer.send(1, &ClientMessage::Resize(SizeDesc { rows: 40, cols: 100 }));
        barrier(&mut peer).await;

        let shell = backend.shell(0);
        assert_eq!(*shell.writes.lock().unwrap(), b"ls\r".to_vec());
        assert_eq!(*shell.resizes.lock().unwrap(), vec![(40, 100)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn resizes_apply_in_arrival_order() {
        let backend = Arc::new(MockBackend::new(AuthMode::Accept));
        let (mut peer, _task) = start(backend.clone());

        peer.send(1, &ClientMessage::NewSession { kind: SHELL });
        peer.recv().await.unwrap();
        for i in 1..=20u16 {
            peer.send(1, &ClientMessage::Resize(SizeDesc { rows: i, cols: i }));
        }
        barrier(&mut peer).await;

        let resizes = backend.shell(0).resizes.lock().unwrap().clone();
        assert_eq!(resizes, (1..=20u16).map(|i| (i, i)).collect::<Vec<_>>());
        assert_eq!(resizes.last(), Some(&(20, 20)));
    }

    #[tokio::test]
    async fn closed_session_ignores_further_frames() {
        let backend = Arc::new(MockBackend::new(AuthMode::Accept));
        let (mut peer, _task) = start(backend.clone());

        peer.send(2, &ClientMessage::NewSession { kind: SHELL });
        peer.recv().await.unwrap();
        peer.send(2, &ClientMessage::CloseSession);
        peer.send(2, &ClientMessage::TermData(b"x".to_vec()));
        peer.send(2, &ClientMessage::Resize(SizeDesc { rows: 1, cols: 1 }));
        peer.send(2, &getwd());
        peer.send(2, &ClientMessage::CloseSession);
        barrier(&mut peer).await;

        let shell = backend.shell(0);
        assert_eq!(shell.closes.load(Ordering::SeqCst), 1);
        assert!(shell.writes.lock().unwrap().is_empty());
        assert!(shell.resizes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn teardown_closes_every_session_once() {
        let backend = Arc::new(MockBackend::new(AuthMode::Accept));
        let (mut peer, task) = start(backend.clone());

        peer.send(1, &ClientMessage::NewSession { kind: SHELL });
        peer.send(2, &ClientMessage::NewSession { kind: FILESYSTEM });
        assert_eq!(peer.recv().await, Some((1, opened(true, false))));
        assert_eq!(peer.recv().await, Some((2, opened(true, false))));

        peer.to_server.close_channel();
        assert_eq!(peer.recv().await, None);
        task.await.unwrap().unwrap();

        assert_eq!(backend.shell(0).closes.load(Ordering::SeqCst), 1);
        assert_eq!(backend.filesystem(0).closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn auth_after_authentication_is_ignored() {
        let backend = Arc::new(MockBackend::new(AuthMode::Accept));
        let (mut peer, _task) = start(backend);
        peer.send(0, &ClientMessage::Auth(AuthDesc::default()));
        barrier(&mut peer).await;
    }
}

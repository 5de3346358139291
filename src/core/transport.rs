//! Purpose: Abstract the byte-level dRPC channel and provide a Unix-socket implementation.
//! Exports: `Transport`, `UnixTransport`, `UnixConnection`, `CallGuard`, `ResponseGuard`.
//! Role: Seam between the call executor and the daemon socket; fakes plug in here for tests.
//! Invariants: Every created call and every returned response is released exactly once.
//! Invariants: `UnixTransport` rejects responses whose sequence does not match the call.

use std::io::{self, Read, Write};
use std::ops::Deref;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::alloc::try_buffer;
use crate::core::error::{Error, ErrorKind};
use crate::core::wire::{
    Call, FRAME_HEADER_LEN, FrameHeader, MethodId, ModuleId, Response, decode_body, encode_frame,
};

pub trait Transport {
    type Handle;

    fn connect(&self, path: &Path) -> Result<Self::Handle, Error>;
    fn close(&self, handle: Self::Handle) -> Result<(), Error>;
    /// Takes ownership of `body`; on failure it is dropped with the error.
    fn create_call(
        &self,
        handle: &mut Self::Handle,
        module: ModuleId,
        method: MethodId,
        body: Vec<u8>,
    ) -> Result<Call, Error>;
    fn invoke_sync(&self, handle: &mut Self::Handle, call: &Call) -> Result<Response, Error>;

    fn release_call(&self, call: Call) {
        drop(call);
    }

    fn release_response(&self, response: Response) {
        drop(response);
    }
}

/// Owns a created call until drop hands it back to the transport.
pub struct CallGuard<'t, T: Transport + ?Sized> {
    transport: &'t T,
    call: Option<Call>,
}

impl<'t, T: Transport + ?Sized> CallGuard<'t, T> {
    pub fn new(transport: &'t T, call: Call) -> Self {
        Self {
            transport,
            call: Some(call),
        }
    }
}

impl<T: Transport + ?Sized> Deref for CallGuard<'_, T> {
    type Target = Call;

    fn deref(&self) -> &Call {
        match &self.call {
            Some(call) => call,
            None => unreachable!("call released before guard drop"),
        }
    }
}

impl<T: Transport + ?Sized> Drop for CallGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(call) = self.call.take() {
            self.transport.release_call(call);
        }
    }
}

pub struct ResponseGuard<'t, T: Transport + ?Sized> {
    transport: &'t T,
    response: Option<Response>,
}

impl<'t, T: Transport + ?Sized> ResponseGuard<'t, T> {
    pub fn new(transport: &'t T, response: Response) -> Self {
        Self {
            transport,
            response: Some(response),
        }
    }
}

impl<T: Transport + ?Sized> Deref for ResponseGuard<'_, T> {
    type Target = Response;

    fn deref(&self) -> &Response {
        match &self.response {
            Some(response) => response,
            None => unreachable!("response released before guard drop"),
        }
    }
}

impl<T: Transport + ?Sized> Drop for ResponseGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(response) = self.response.take() {
            self.transport.release_response(response);
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct UnixTransport {
    timeout: Option<Duration>,
}

pub struct UnixConnection {
    stream: UnixStream,
    path: PathBuf,
    next_sequence: i64,
}

impl UnixConnection {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl UnixTransport {
    pub fn new() -> Self {
        Self { timeout: None }
    }

    /// Read/write timeout applied to every connection; `None` blocks indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Transport for UnixTransport {
    type Handle = UnixConnection;

    fn connect(&self, path: &Path) -> Result<Self::Handle, Error> {
        let stream = UnixStream::connect(path).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to connect to dRPC socket")
                .with_path(path)
                .with_source(err)
        })?;
        stream
            .set_read_timeout(self.timeout)
            .and_then(|_| stream.set_write_timeout(self.timeout))
            .map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to configure dRPC socket timeout")
                    .with_path(path)
                    .with_source(err)
            })?;
        Ok(UnixConnection {
            stream,
            path: path.to_path_buf(),
            next_sequence: 1,
        })
    }

    fn close(&self, handle: Self::Handle) -> Result<(), Error> {
        match handle.stream.shutdown(std::net::Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(Error::new(ErrorKind::Io)
                .with_message("failed to close dRPC socket")
                .with_path(&handle.path)
                .with_source(err)),
        }
    }

    fn create_call(
        &self,
        handle: &mut Self::Handle,
        module: ModuleId,
        method: MethodId,
        body: Vec<u8>,
    ) -> Result<Call, Error> {
        let sequence = handle.next_sequence;
        handle.next_sequence = handle.next_sequence.wrapping_add(1);
        Ok(Call {
            module,
            method,
            sequence,
            body,
        })
    }

    fn invoke_sync(&self, handle: &mut Self::Handle, call: &Call) -> Result<Response, Error> {
        let frame = encode_frame(call)?;
        handle
            .stream
            .write_all(&frame)
            .and_then(|_| handle.stream.flush())
            .map_err(|err| io_error("failed to send dRPC call", &handle.path, err))?;

        let mut header_buf = [0u8; FRAME_HEADER_LEN];
        handle
            .stream
            .read_exact(&mut header_buf)
            .map_err(|err| io_error("failed to read dRPC response header", &handle.path, err))?;
        let header = FrameHeader::decode(&header_buf)?;

        let body_len = header.body_len as usize;
        let mut body = try_buffer(body_len)?;
        body.resize(body_len, 0);
        handle
            .stream
            .read_exact(&mut body)
            .map_err(|err| io_error("failed to read dRPC response body", &handle.path, err))?;

        let response: Response = decode_body(&body)?;
        if response.sequence != call.sequence {
            return Err(Error::new(ErrorKind::Io)
                .with_message(format!(
                    "dRPC response sequence {} does not match call {}",
                    response.sequence, call.sequence
                ))
                .with_path(&handle.path));
        }
        Ok(response)
    }
}

fn io_error(message: &str, path: &Path, err: io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message(message)
        .with_path(path)
        .with_source(err)
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory transport with live-resource accounting and scripted replies.
    use super::*;
    use crate::core::wire::Status;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex, MutexGuard};

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub(crate) enum Fault {
        Connect,
        CreateCall,
        Invoke,
        Close,
    }

    #[derive(Default)]
    pub(crate) struct FakeState {
        pub(crate) connects: usize,
        pub(crate) closes: usize,
        pub(crate) open_handles: usize,
        pub(crate) live_calls: usize,
        pub(crate) live_responses: usize,
        pub(crate) invocations: usize,
        pub(crate) calls: Vec<Call>,
        pub(crate) replies: VecDeque<Result<Response, ErrorKind>>,
        pub(crate) faults: Vec<Fault>,
        pub(crate) connected_paths: Vec<PathBuf>,
    }

    #[derive(Clone, Default)]
    pub(crate) struct FakeTransport {
        state: Arc<Mutex<FakeState>>,
    }

    pub(crate) struct FakeHandle {
        next_sequence: i64,
    }

    impl FakeTransport {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn state(&self) -> MutexGuard<'_, FakeState> {
            self.state.lock().expect("lock")
        }

        pub(crate) fn fail(&self, fault: Fault) {
            self.state().faults.push(fault);
        }

        pub(crate) fn reply(&self, status: Status, body: Vec<u8>) {
            self.state()
                .replies
                .push_back(Ok(Response::new(0, status, body)));
        }

        pub(crate) fn reply_json(&self, value: serde_json::Value) {
            let body = serde_json::to_vec(&value).expect("json");
            self.reply(Status::Success, body);
        }

        pub(crate) fn reply_err(&self, kind: ErrorKind) {
            self.state().replies.push_back(Err(kind));
        }

        /// Decoded JSON body of the `index`th call handed to `invoke_sync`.
        pub(crate) fn call_body(&self, index: usize) -> serde_json::Value {
            let state = self.state();
            serde_json::from_slice(&state.calls[index].body).expect("call body json")
        }

        pub(crate) fn assert_no_leaks(&self) {
            let state = self.state();
            assert_eq!(state.live_calls, 0, "leaked calls");
            assert_eq!(state.live_responses, 0, "leaked responses");
        }

        fn take_fault(&self, fault: Fault) -> bool {
            let mut state = self.state();
            match state.faults.iter().position(|f| *f == fault) {
                Some(index) => {
                    state.faults.remove(index);
                    true
                }
                None => false,
            }
        }
    }

    impl Transport for FakeTransport {
        type Handle = FakeHandle;

        fn connect(&self, path: &Path) -> Result<Self::Handle, Error> {
            if self.take_fault(Fault::Connect) {
                return Err(Error::new(ErrorKind::Io).with_message("connect refused"));
            }
            let mut state = self.state();
            state.connects += 1;
            state.open_handles += 1;
            state.connected_paths.push(path.to_path_buf());
            Ok(FakeHandle { next_sequence: 1 })
        }

        fn close(&self, _handle: Self::Handle) -> Result<(), Error> {
            let failed = self.take_fault(Fault::Close);
            let mut state = self.state();
            state.closes += 1;
            state.open_handles -= 1;
            if failed {
                return Err(Error::new(ErrorKind::Io).with_message("close failed"));
            }
            Ok(())
        }

        fn create_call(
            &self,
            handle: &mut Self::Handle,
            module: ModuleId,
            method: MethodId,
            body: Vec<u8>,
        ) -> Result<Call, Error> {
            if self.take_fault(Fault::CreateCall) {
                return Err(Error::new(ErrorKind::OutOfMemory).with_message("call alloc failed"));
            }
            let sequence = handle.next_sequence;
            handle.next_sequence += 1;
            self.state().live_calls += 1;
            Ok(Call {
                module,
                method,
                sequence,
                body,
            })
        }

        fn invoke_sync(&self, _handle: &mut Self::Handle, call: &Call) -> Result<Response, Error> {
            if self.take_fault(Fault::Invoke) {
                return Err(Error::new(ErrorKind::Io).with_message("socket write failed"));
            }
            let mut state = self.state();
            state.invocations += 1;
            state.calls.push(call.clone());
            let reply = state
                .replies
                .pop_front()
                .unwrap_or_else(|| Ok(Response::new(0, Status::Success, Vec::new())));
            match reply {
                Ok(mut response) => {
                    response.sequence = call.sequence;
                    state.live_responses += 1;
                    Ok(response)
                }
                Err(kind) => Err(Error::new(kind).with_message("scripted failure")),
            }
        }

        fn release_call(&self, call: Call) {
            drop(call);
            self.state().live_calls -= 1;
        }

        fn release_response(&self, response: Response) {
            drop(response);
            self.state().live_responses -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeTransport;
    use super::*;
    use crate::core::wire::{Status, registry};
    use std::os::unix::net::UnixListener;

    #[test]
    fn guards_release_exactly_once() {
        let transport = FakeTransport::new();
        let mut handle = transport.connect(Path::new("/tmp/x.sock")).expect("connect");
        let call = transport
            .create_call(
                &mut handle,
                registry::MODULE_SRV,
                registry::METHOD_SRV_NOTIFY_READY,
                vec![1],
            )
            .expect("call");
        {
            let call = CallGuard::new(&transport, call);
            let response = transport.invoke_sync(&mut handle, &call).expect("invoke");
            let response = ResponseGuard::new(&transport, response);
            assert_eq!(response.sequence, call.sequence);
            assert_eq!(transport.state().live_calls, 1);
            assert_eq!(transport.state().live_responses, 1);
        }
        transport.assert_no_leaks();
    }

    #[test]
    fn unix_transport_round_trips_one_call() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("daos_server.sock");
        let listener = UnixListener::bind(&path).expect("bind");
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut header = [0u8; FRAME_HEADER_LEN];
            stream.read_exact(&mut header).expect("header");
            let header = FrameHeader::decode(&header).expect("decode header");
            let mut body = vec![0u8; header.body_len as usize];
            stream.read_exact(&mut body).expect("body");
            let call: Call = decode_body(&body).expect("call");
            let response = Response::new(call.sequence, Status::Success, call.body.clone());
            stream
                .write_all(&encode_frame(&response).expect("frame"))
                .expect("write");
            call
        });

        let transport = UnixTransport::new().with_timeout(Some(Duration::from_secs(5)));
        let mut handle = transport.connect(&path).expect("connect");
        let call = transport
            .create_call(
                &mut handle,
                registry::MODULE_SRV,
                registry::METHOD_SRV_GET_POOL_SVC,
                b"{}".to_vec(),
            )
            .expect("call");
        let response = transport.invoke_sync(&mut handle, &call).expect("invoke");
        assert_eq!(response.status, Status::Success);
        assert_eq!(response.body, b"{}".to_vec());
        transport.close(handle).expect("close");

        let seen = server.join().expect("join");
        assert_eq!(seen.module, registry::MODULE_SRV);
        assert_eq!(seen.method, registry::METHOD_SRV_GET_POOL_SVC);
        assert_eq!(seen.sequence, 1);
    }

    #[test]
    fn unix_transport_connect_failure_is_io_with_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("missing.sock");
        let err = UnixTransport::new().connect(&path).err().expect("err");
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.path(), Some(path.as_path()));
    }
}

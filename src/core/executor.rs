//! Purpose: Run one synchronous dRPC round trip with guaranteed release of call and response.
//! Exports: `execute`, `execute_raw`.
//! Role: Shared call pattern behind every bridge operation.
//! Invariants: No connection means `Uninitialized` and the transport is never touched.
//! Invariants: Response is released before the call; each exactly once on every path.
use tracing::error;

use crate::core::error::{Error, ErrorKind};
use crate::core::transport::{CallGuard, ResponseGuard, Transport};
use crate::core::wire::{MethodId, ModuleId, Response};

/// Round trip that hands the response to `on_response` whatever its transport status.
pub fn execute_raw<T, R>(
    transport: &T,
    handle: Option<&mut T::Handle>,
    module: ModuleId,
    method: MethodId,
    request: Vec<u8>,
    on_response: impl FnOnce(&Response) -> Result<R, Error>,
) -> Result<R, Error>
where
    T: Transport + ?Sized,
{
    let Some(handle) = handle else {
        return Err(Error::new(ErrorKind::Uninitialized).with_message("dRPC not connected"));
    };

    let call = transport.create_call(handle, module, method, request)?;
    let call = CallGuard::new(transport, call);

    let response = transport.invoke_sync(handle, &call)?;
    let response = ResponseGuard::new(transport, response);

    on_response(&response)
}

/// Round trip where a non-success transport status becomes an `Io` error.
pub fn execute<T, R>(
    transport: &T,
    handle: Option<&mut T::Handle>,
    module: ModuleId,
    method: MethodId,
    request: Vec<u8>,
    on_response: impl FnOnce(&Response) -> Result<R, Error>,
) -> Result<R, Error>
where
    T: Transport + ?Sized,
{
    execute_raw(transport, handle, module, method, request, |response| {
        if !response.status.is_success() {
            error!(
                status = ?response.status,
                module = module.0,
                method = method.0,
                "received erroneous dRPC response"
            );
            return Err(Error::new(ErrorKind::Io)
                .with_message(format!("erroneous dRPC response: {:?}", response.status))
                .with_status(i32::from(response.status)));
        }
        on_response(response)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::fake::{Fault, FakeTransport};
    use crate::core::wire::{Status, registry};
    use std::path::Path;

    fn connected(transport: &FakeTransport) -> <FakeTransport as Transport>::Handle {
        transport
            .connect(Path::new("/tmp/daos_server.sock"))
            .ok()
            .expect("connect")
    }

    #[test]
    fn missing_connection_never_touches_transport() {
        let transport = FakeTransport::new();
        let err = execute(
            &transport,
            None,
            registry::MODULE_SRV,
            registry::METHOD_SRV_NOTIFY_READY,
            vec![1, 2],
            |_| Ok(()),
        )
        .expect_err("uninitialized");
        assert_eq!(err.kind(), ErrorKind::Uninitialized);
        let state = transport.state();
        assert_eq!(state.invocations, 0);
        assert!(state.calls.is_empty());
    }

    #[test]
    fn success_releases_call_and_response() {
        let transport = FakeTransport::new();
        let mut handle = connected(&transport);
        transport.reply(Status::Success, b"ok".to_vec());
        let body = execute(
            &transport,
            Some(&mut handle),
            registry::MODULE_SRV,
            registry::METHOD_SRV_GET_POOL_SVC,
            b"req".to_vec(),
            |response| Ok(response.body.clone()),
        )
        .expect("execute");
        assert_eq!(body, b"ok".to_vec());
        assert_eq!(transport.state().calls[0].body, b"req".to_vec());
        transport.assert_no_leaks();
    }

    #[test]
    fn non_success_status_is_io_and_releases() {
        let transport = FakeTransport::new();
        let mut handle = connected(&transport);
        transport.reply(Status::UnknownMethod, Vec::new());
        let err = execute(
            &transport,
            Some(&mut handle),
            registry::MODULE_SRV,
            registry::METHOD_SRV_BIO_ERR,
            Vec::new(),
            |_| Ok(()),
        )
        .expect_err("io");
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.status(), Some(4));
        transport.assert_no_leaks();
    }

    #[test]
    fn raw_execution_passes_failed_status_through() {
        let transport = FakeTransport::new();
        let mut handle = connected(&transport);
        transport.reply(Status::Failure, Vec::new());
        let status = execute_raw(
            &transport,
            Some(&mut handle),
            registry::MODULE_MGMT,
            registry::METHOD_MGMT_CLUSTER_EVENT,
            Vec::new(),
            |response| Ok(response.status),
        )
        .expect("raw");
        assert_eq!(status, Status::Failure);
        transport.assert_no_leaks();
    }

    #[test]
    fn create_and_invoke_failures_release_everything() {
        for fault in [Fault::CreateCall, Fault::Invoke] {
            let transport = FakeTransport::new();
            let mut handle = connected(&transport);
            transport.fail(fault);
            let result = execute(
                &transport,
                Some(&mut handle),
                registry::MODULE_SRV,
                registry::METHOD_SRV_NOTIFY_READY,
                vec![0; 32],
                |_| Ok(()),
            );
            assert!(result.is_err(), "{fault:?} should fail");
            assert_eq!(transport.state().invocations, 0);
            transport.assert_no_leaks();
        }
    }

    #[test]
    fn handler_error_still_releases() {
        let transport = FakeTransport::new();
        let mut handle = connected(&transport);
        let err = execute(
            &transport,
            Some(&mut handle),
            registry::MODULE_SRV,
            registry::METHOD_SRV_GET_POOL_SVC,
            Vec::new(),
            |_| -> Result<(), Error> { Err(Error::new(ErrorKind::Decode)) },
        )
        .expect_err("decode");
        assert_eq!(err.kind(), ErrorKind::Decode);
        transport.assert_no_leaks();
    }
}

use lenframe_frame::{FrameConfig, FrameWriter, CLOSE_SOCKET};
use lenframe_transport::{resolve, NetStream, TcpEndpoint};

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{frame_error, transport_error, CliError, CliResult, DATA_INVALID, SUCCESS};

pub fn run(args: SendArgs) -> CliResult<i32> {
    if args.data.is_empty() {
        return Err(CliError::new(DATA_INVALID, "--data must not be empty"));
    }
    let timeout = parse_duration(&args.timeout)?;
    let endpoint = resolve(&args.addr).map_err(|err| transport_error("bad address", err))?;

    let stream = TcpEndpoint::connect(endpoint, timeout)
        .map_err(|err| transport_error("connect failed", err))?;
    let mut writer = open_writer(stream, timeout)?;

    writer
        .send(&args.data)
        .map_err(|err| frame_error("send failed", err))?;
    if args.close {
        writer
            .send(CLOSE_SOCKET)
            .map_err(|err| frame_error("close failed", err))?;
    }

    if let Err(err) = writer.get_ref().shutdown_write() {
        tracing::debug!(error = %err, "shutdown after send");
    }
    Ok(SUCCESS)
}

fn open_writer(stream: NetStream, timeout: std::time::Duration) -> CliResult<FrameWriter<NetStream>> {
    let config = FrameConfig {
        write_timeout: Some(timeout),
        ..FrameConfig::default()
    };
    FrameWriter::with_config_net(stream, config).map_err(|err| frame_error("configure failed", err))
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;

    use lenframe_frame::encode;

    use super::*;

    fn args(addr: String, data: &str, close: bool) -> SendArgs {
        SendArgs {
            addr,
            data: data.to_string(),
            close,
            timeout: "2s".to_string(),
        }
    }

    #[test]
    fn sends_frame_then_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut wire = Vec::new();
            stream.read_to_end(&mut wire).expect("read");
            wire
        });

        assert_eq!(run(args(addr, "hello", true)).unwrap(), SUCCESS);

        let mut expected = encode("hello").unwrap().to_vec();
        expected.extend_from_slice(&encode(CLOSE_SOCKET).unwrap());
        assert_eq!(server.join().expect("server thread"), expected);
    }

    #[test]
    fn empty_data_is_rejected() {
        let err = run(args("127.0.0.1:1".to_string(), "", false)).unwrap_err();
        assert_eq!(err.code, DATA_INVALID);
    }
}

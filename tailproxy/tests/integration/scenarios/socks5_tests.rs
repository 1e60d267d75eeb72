use crate::{free_port, MockMeshNode, TailproxyProcess};
use std::time::Duration;
use tailproxy_proto::socks5::{self, Addr};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ErrorKind};
use tokio::net::TcpStream;

#[tokio::test]
async fn connect_through_socks5_proxy_reaches_echo_server() -> anyhow::Result<()> {
    let echo = MockMeshNode::spawn().await?;

    let proxy_port = free_port().await?;
    let mut process = TailproxyProcess::spawn(&["--port", &proxy_port.to_string()])?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(process.is_running(), "supervisor should be up");

    let mut client = TcpStream::connect(("127.0.0.1", proxy_port)).await?;
    client.write_all(&socks5::encode_greeting()).await?;
    let mut greeting_reply = [0u8; 2];
    client.read_exact(&mut greeting_reply).await?;
    socks5::parse_greeting_reply(greeting_reply).expect("proxy should accept NO-AUTH");

    let request = socks5::encode_connect_request(&Addr::V4("127.0.0.1".parse()?), echo.port);
    client.write_all(&request).await?;

    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await?;
    assert_eq!(reply[1], socks5::REP_SUCCEEDED);

    client.write_all(b"hello").await?;
    let mut echoed = [0u8; 5];
    client.read_exact(&mut echoed).await?;
    assert_eq!(&echoed, b"hello");

    process.terminate()?;
    process.wait_for_exit_timeout(Duration::from_secs(5)).await?;
    Ok(())
}

#[tokio::test]
async fn connect_to_unreachable_destination_fails_cleanly() -> anyhow::Result<()> {
    let proxy_port = free_port().await?;
    let mut process = TailproxyProcess::spawn(&["--port", &proxy_port.to_string()])?;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut client = TcpStream::connect(("127.0.0.1", proxy_port)).await?;
    client.write_all(&socks5::encode_greeting()).await?;
    let mut greeting_reply = [0u8; 2];
    client.read_exact(&mut greeting_reply).await?;
    socks5::parse_greeting_reply(greeting_reply)?;

    // Port 1 on loopback is not listening.
    let request = socks5::encode_connect_request(&Addr::V4("127.0.0.1".parse()?), 1);
    client.write_all(&request).await?;

    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await?;
    assert_ne!(reply[1], socks5::REP_SUCCEEDED);

    process.terminate()?;
    process.wait_for_exit_timeout(Duration::from_secs(5)).await?;
    Ok(())
}

#[tokio::test]
async fn bind_command_is_rejected_as_unsupported() -> anyhow::Result<()> {
    let proxy_port = free_port().await?;
    let mut process = TailproxyProcess::spawn(&["--port", &proxy_port.to_string()])?;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut client = TcpStream::connect(("127.0.0.1", proxy_port)).await?;
    client.write_all(&socks5::encode_greeting()).await?;
    let mut greeting_reply = [0u8; 2];
    client.read_exact(&mut greeting_reply).await?;
    socks5::parse_greeting_reply(greeting_reply)?;

    // BIND (0x02) instead of CONNECT (0x01): only CONNECT is supported.
    let bind_cmd = 0x02;
    let mut request = socks5::encode_connect_request(&Addr::V4("127.0.0.1".parse()?), 80);
    request[1] = bind_cmd;
    client.write_all(&request).await?;

    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await?;
    assert_eq!(reply[1], socks5::REP_COMMAND_NOT_SUPPORTED);

    process.terminate()?;
    process.wait_for_exit_timeout(Duration::from_secs(5)).await?;
    Ok(())
}

#[tokio::test]
async fn wrong_greeting_version_drops_connection_without_reply() -> anyhow::Result<()> {
    let proxy_port = free_port().await?;
    let mut process = TailproxyProcess::spawn(&["--port", &proxy_port.to_string()])?;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut client = TcpStream::connect(("127.0.0.1", proxy_port)).await?;
    // SOCKS4-style version byte instead of 0x05.
    client.write_all(&[0x04, 0x01, 0x00]).await?;

    let mut buf = [0u8; 2];
    let result = client.read_exact(&mut buf).await;
    assert!(
        matches!(result, Err(e) if e.kind() == ErrorKind::UnexpectedEof),
        "server should close the connection without replying to a bad greeting version"
    );

    process.terminate()?;
    process.wait_for_exit_timeout(Duration::from_secs(5)).await?;
    Ok(())
}

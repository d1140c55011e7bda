use super::Transport;
use std::{collections::BTreeSet, io, time::Duration};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

const DEFAULT_DAEMON_PORT: u16 = 9418;
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

pub const ALLOW_REACHABLE_SHA1_IN_WANT: &str = "allow-reachable-sha1-in-want";
pub const ALLOW_ANY_SHA1_IN_WANT: &str = "allow-any-sha1-in-want";

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("invalid pkt-line length {0:?}")]
    InvalidLength(String),
    #[error("pkt-line stream ended inside a packet")]
    Truncated,
    #[error("invalid remote url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("remote answered with status {0}")]
    Status(reqwest::StatusCode),
    #[error("connection failed: {0}")]
    Io(#[from] io::Error),
    #[error("capability probe timed out")]
    Timeout,
    #[error("capability probe was cancelled")]
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PktLine {
    Flush,
    Data(Vec<u8>),
}

/// Splits a buffer of pkt-line framed packets.
pub fn parse_pkt_lines(mut data: &[u8]) -> Result<Vec<PktLine>, CapabilityError> {
    let mut lines = vec![];

    while !data.is_empty() {
        let length = packet_length(data.get(..4).ok_or(CapabilityError::Truncated)?)?;

        if length == 0 {
            lines.push(PktLine::Flush);
            data = &data[4..];
            continue;
        }

        let payload = data.get(4..length).ok_or(CapabilityError::Truncated)?;
        lines.push(PktLine::Data(payload.to_vec()));
        data = &data[length..];
    }

    Ok(lines)
}

fn packet_length(header: &[u8]) -> Result<usize, CapabilityError> {
    let text = std::str::from_utf8(header)
        .map_err(|_| CapabilityError::InvalidLength(String::from_utf8_lossy(header).into_owned()))?;

    let length = usize::from_str_radix(text, 16)
        .map_err(|_| CapabilityError::InvalidLength(text.to_string()))?;

    // 0001..0003 are reserved (delim, response-end) and never carry data
    if length != 0 && length < 4 {
        return Ok(0);
    }

    Ok(length)
}

pub fn encode_pkt_line(payload: &[u8]) -> Vec<u8> {
    let mut line = format!("{:04x}", payload.len() + 4).into_bytes();
    line.extend_from_slice(payload);
    line
}

/// What an upload-pack service announced before any negotiation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Advertisement {
    pub version: u8,
    pub capabilities: BTreeSet<String>,
}

impl Advertisement {
    pub fn has(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|advertised| {
            advertised == capability
                || advertised
                    .strip_prefix(capability)
                    .map(|rest| rest.starts_with('='))
                    .unwrap_or(false)
        })
    }

    pub fn allows_fetch_by_oid(&self) -> bool {
        self.has(ALLOW_REACHABLE_SHA1_IN_WANT) || self.has(ALLOW_ANY_SHA1_IN_WANT)
    }
}

/// Parses a protocol v0/v1 ref advertisement, with or without the smart
/// HTTP `# service=` preamble. Protocol v2 capability lists are recorded
/// as-is.
pub fn parse_advertisement(data: &[u8]) -> Result<Advertisement, CapabilityError> {
    let mut advertisement = Advertisement {
        version: 0,
        capabilities: BTreeSet::new(),
    };

    let mut seen_ref = false;

    for line in parse_pkt_lines(data)? {
        let PktLine::Data(payload) = line else {
            continue;
        };

        let text = String::from_utf8_lossy(&payload);
        let text = text.trim_end_matches('\n');

        if text.starts_with("# service=") {
            continue;
        }

        if let Some(version) = text.strip_prefix("version ") {
            advertisement.version = version.trim().parse().unwrap_or(0);
            continue;
        }

        if advertisement.version >= 2 {
            advertisement.capabilities.insert(text.to_string());
            continue;
        }

        if seen_ref {
            continue;
        }

        seen_ref = true;

        if let Some((_, capabilities)) = text.split_once('\0') {
            advertisement.capabilities.extend(
                capabilities
                    .split(' ')
                    .filter(|capability| !capability.is_empty())
                    .map(str::to_string),
            );
        }
    }

    Ok(advertisement)
}

/// Asks a smart HTTP remote for its upload-pack advertisement.
pub async fn probe_http(url: &Url) -> Result<Advertisement, CapabilityError> {
    let endpoint = format!(
        "{}/info/refs?service=git-upload-pack",
        url.as_str().trim_end_matches('/')
    );

    debug!("probing {}", endpoint);

    let client = reqwest::Client::builder()
        .user_agent(concat!("git/2.0 distrobuild/", env!("CARGO_PKG_VERSION")))
        .timeout(PROBE_TIMEOUT)
        .build()?;

    let response = client.get(&endpoint).send().await?;

    if !response.status().is_success() {
        return Err(CapabilityError::Status(response.status()));
    }

    let body = response.bytes().await?;

    parse_advertisement(&body)
}

/// Asks a `git://` daemon for its upload-pack advertisement.
pub async fn probe_daemon(url: &Url) -> Result<Advertisement, CapabilityError> {
    let host = url.host_str().ok_or_else(|| CapabilityError::InvalidUrl {
        url: url.to_string(),
        reason: "missing host".to_string(),
    })?;
    let port = url.port().unwrap_or(DEFAULT_DAEMON_PORT);

    debug!("probing git daemon {}:{}", host, port);

    let mut stream = TcpStream::connect((host, port)).await?;

    let request = format!("git-upload-pack {}\0host={}\0", url.path(), host);
    stream.write_all(&encode_pkt_line(request.as_bytes())).await?;

    let mut data = vec![];

    loop {
        let mut header = [0u8; 4];
        stream.read_exact(&mut header).await?;
        data.extend_from_slice(&header);

        let length = packet_length(&header)?;
        if length == 0 {
            break;
        }

        let mut payload = vec![0u8; length - 4];
        stream.read_exact(&mut payload).await?;
        data.extend_from_slice(&payload);
    }

    stream.write_all(b"0000").await?;

    parse_advertisement(&data)
}

/// Advertisement of a remote given by url, if its transport can be probed.
/// Local repositories serve any object and report `None`.
pub async fn probe(url: &str, cancel: &CancellationToken) -> Result<Option<Advertisement>, CapabilityError> {
    let transport = Transport::of(url);

    let probe = async {
        match &transport {
            Transport::Http(parsed) => probe_http(parsed).await.map(Some),
            Transport::Daemon(parsed) => probe_daemon(parsed).await.map(Some),
            Transport::Local => Ok(None),
            Transport::Other => Ok(Some(Advertisement::default())),
        }
    };

    tokio::select! {
        _ = cancel.cancelled() => Err(CapabilityError::Cancelled),
        result = tokio::time::timeout(PROBE_TIMEOUT, probe) => {
            result.map_err(|_| CapabilityError::Timeout)?
        }
    }
}

/// Whether a commit id can be requested directly from `url`.
pub async fn supports_fetch_by_oid(url: &str, cancel: &CancellationToken) -> Result<bool, CapabilityError> {
    match probe(url, cancel).await {
        Ok(None) => Ok(true),
        Ok(Some(advertisement)) => Ok(advertisement.allows_fetch_by_oid()),
        Err(CapabilityError::Cancelled) => Err(CapabilityError::Cancelled),
        Err(err) => {
            warn!("failed to probe capabilities of {}: {}", url, err);
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const OID: &str = "95d09f2b10159347eece71399a7e2e907ea3df4f";

    fn advertisement(capabilities: &str) -> Vec<u8> {
        let mut data = vec![];
        data.extend(encode_pkt_line(
            format!("{} HEAD\0{}\n", OID, capabilities).as_bytes(),
        ));
        data.extend(encode_pkt_line(
            format!("{} refs/heads/main\n", OID).as_bytes(),
        ));
        data.extend(b"0000");
        data
    }

    #[test]
    fn encodes_length_prefix() {
        assert_eq!(encode_pkt_line(b"a\n"), b"0006a\n".to_vec());
    }

    #[test]
    fn parses_smart_http_response() {
        let mut body = encode_pkt_line(b"# service=git-upload-pack\n");
        body.extend(b"0000");
        body.extend(advertisement(
            "multi_ack thin-pack side-band-64k allow-tip-sha1-in-want allow-reachable-sha1-in-want symref=HEAD:refs/heads/main agent=git/2.42.0",
        ));

        let parsed = parse_advertisement(&body).unwrap();

        assert!(parsed.allows_fetch_by_oid());
        assert!(parsed.has("symref"));
        assert!(parsed.has("agent"));
        assert!(!parsed.has("shallow"));
    }

    #[test]
    fn missing_capability_is_reported() {
        let parsed = parse_advertisement(&advertisement("multi_ack thin-pack shallow")).unwrap();

        assert!(parsed.has("shallow"));
        assert!(!parsed.allows_fetch_by_oid());
    }

    #[test]
    fn truncated_packets_fail() {
        assert!(matches!(
            parse_pkt_lines(b"0010abc"),
            Err(CapabilityError::Truncated)
        ));
        assert!(matches!(
            parse_pkt_lines(b"zzzz"),
            Err(CapabilityError::InvalidLength(_))
        ));
    }

    async fn serve_once(listener: TcpListener, response: Vec<u8>) -> Vec<u8> {
        let (mut socket, _) = listener.accept().await.unwrap();

        let mut header = [0u8; 4];
        socket.read_exact(&mut header).await.unwrap();
        let length = usize::from_str_radix(std::str::from_utf8(&header).unwrap(), 16).unwrap();
        let mut request = vec![0u8; length - 4];
        socket.read_exact(&mut request).await.unwrap();

        socket.write_all(&response).await.unwrap();

        let mut rest = vec![];
        let _ = socket.read_to_end(&mut rest).await;

        request
    }

    #[tokio::test]
    async fn daemon_advertising_reachable_oids() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(serve_once(
            listener,
            advertisement("multi_ack allow-reachable-sha1-in-want"),
        ));

        let url = format!("git://127.0.0.1:{}/pub/musl", port);
        let supported = supports_fetch_by_oid(&url, &CancellationToken::new())
            .await
            .unwrap();

        assert!(supported);

        let request = server.await.unwrap();
        assert_eq!(
            request,
            b"git-upload-pack /pub/musl\0host=127.0.0.1\0".to_vec()
        );
    }

    #[tokio::test]
    async fn daemon_without_capability_falls_back() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(serve_once(listener, advertisement("multi_ack shallow")));

        let url = format!("git://127.0.0.1:{}/busybox", port);
        let supported = supports_fetch_by_oid(&url, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!supported);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn smart_http_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            let mut request = vec![];
            let mut buffer = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let read = socket.read(&mut buffer).await.unwrap();
                if read == 0 {
                    break;
                }
                request.extend_from_slice(&buffer[..read]);
            }

            let mut body = encode_pkt_line(b"# service=git-upload-pack\n");
            body.extend(b"0000");
            body.extend(advertisement("allow-any-sha1-in-want"));

            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/x-git-upload-pack-advertisement\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(&body).await.unwrap();

            String::from_utf8_lossy(&request).into_owned()
        });

        let url = format!("http://127.0.0.1:{}/tukaani-project/xz.git", port);
        let supported = supports_fetch_by_oid(&url, &CancellationToken::new())
            .await
            .unwrap();

        assert!(supported);

        let request = server.await.unwrap();
        assert!(request.starts_with(
            "GET /tukaani-project/xz.git/info/refs?service=git-upload-pack HTTP/1.1"
        ));
    }

    #[tokio::test]
    async fn local_paths_serve_any_object() {
        let cancel = CancellationToken::new();

        assert!(supports_fetch_by_oid("/srv/git/musl", &cancel).await.unwrap());
        assert!(supports_fetch_by_oid("file:///srv/git/musl", &cancel)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn ssh_remotes_take_the_fallback() {
        let cancel = CancellationToken::new();

        for url in [
            "ssh://git@example.com/musl.git",
            "git@github.com:libfuse/libfuse.git",
            "example.com:musl.git",
        ] {
            assert!(!supports_fetch_by_oid(url, &cancel).await.unwrap(), "{}", url);
        }
    }
}

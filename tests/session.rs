//! End-to-end scenarios against a scripted server on a local socket.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};

use tokio_jabber::error::AuthError;
use tokio_jabber::{roster, Client, Error, Jid, Presence, ServerConfig, Stanza};

const OPEN: &str = "<?xml version='1.0'?><stream:stream xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams' id='s1' from='example.net' version='1.0'>";
const REOPEN: &str = "<stream:stream xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams' id='s2' from='example.net' version='1.0'>";
const FEATURES_DIGEST: &str = "<stream:features><mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism>DIGEST-MD5</mechanism></mechanisms></stream:features>";
const FEATURES_BIND_SESSION: &str = "<stream:features><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/><session xmlns='urn:ietf:params:xml:ns:xmpp-session'/></stream:features>";
const FEATURES_BIND: &str =
    "<stream:features><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/></stream:features>";

/// A server side that matches client output as text and answers from a
/// canned script.
struct Script {
    stream: TcpStream,
    buf: String,
    pos: usize,
}

impl Script {
    fn new(stream: TcpStream) -> Script {
        Script {
            stream,
            buf: String::new(),
            pos: 0,
        }
    }

    async fn send(&mut self, payload: &str) {
        self.stream
            .write_all(payload.as_bytes())
            .await
            .expect("server write");
    }

    /// Read until `pattern` appears past the last consumed position and
    /// return the consumed text, pattern included.
    async fn read_until(&mut self, pattern: &str) -> String {
        timeout(Duration::from_secs(5), async {
            loop {
                if let Some(found) = self.buf[self.pos..].find(pattern) {
                    let end = self.pos + found + pattern.len();
                    let taken = self.buf[self.pos..end].to_owned();
                    self.pos = end;
                    return taken;
                }
                let mut chunk = [0u8; 4096];
                let n = self.stream.read(&mut chunk).await.expect("server read");
                assert!(n > 0, "client closed while waiting for {:?}", pattern);
                self.buf
                    .push_str(std::str::from_utf8(&chunk[..n]).expect("client sent valid utf8"));
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {:?}", pattern))
    }

    /// Wait for the client to go away.
    async fn drain(&mut self) {
        let mut chunk = [0u8; 4096];
        let _ = timeout(Duration::from_secs(5), self.stream.read(&mut chunk)).await;
    }
}

fn attr<'a>(fragment: &'a str, name: &str) -> &'a str {
    let key = format!(" {}=\"", name);
    let start = fragment
        .find(&key)
        .unwrap_or_else(|| panic!("attribute {} in {:?}", name, fragment))
        + key.len();
    let end = fragment[start..].find('"').unwrap() + start;
    &fragment[start..end]
}

async fn test_server() -> (TcpListener, ServerConfig) {
    let _ = env_logger::builder().is_test(true).try_init();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (
        listener,
        ServerConfig::Addr {
            addr: addr.to_string(),
        },
    )
}

/// Greet, run one-round DIGEST-MD5 and answer the bind iq with
/// `bound_jid`. The common prefix of most scenarios.
async fn negotiate(script: &mut Script, features_after_auth: &str, bound_jid: &str) {
    script.read_until("<stream:stream").await;
    script.read_until(">").await;
    script.send(OPEN).await;
    script.send(FEATURES_DIGEST).await;

    script.read_until("<auth").await;
    script.read_until("/>").await;
    let challenge =
        BASE64.encode(r#"realm="example.net",nonce="OA6MG9tEQGm2hh",qop="auth",charset=utf-8"#);
    script
        .send(&format!(
            "<challenge xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>{}</challenge>",
            challenge
        ))
        .await;
    script.read_until("</response>").await;
    script
        .send("<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>")
        .await;

    script.read_until("<stream:stream").await;
    script.read_until(">").await;
    script.send(REOPEN).await;
    script.send(features_after_auth).await;

    let bind_request = script.read_until("</iq>").await;
    let id = attr(&bind_request, "id").to_owned();
    script
        .send(&format!(
            "<iq id='{}' type='result'><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'><jid>{}</jid></bind></iq>",
            id, bound_jid
        ))
        .await;
}

#[tokio::test]
async fn sasl_bind_session_and_initial_presence() {
    let (listener, config) = test_server().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut script = Script::new(stream);
        negotiate(&mut script, FEATURES_BIND_SESSION, "juliet@example.net/r").await;

        let session_request = script.read_until("</iq>").await;
        assert!(session_request.contains("urn:ietf:params:xml:ns:xmpp-session"));
        let id = attr(&session_request, "id").to_owned();
        script
            .send(&format!("<iq id='{}' type='result'/>", id))
            .await;

        script.read_until("<presence").await;
        script.drain().await;
    });

    let jid: Jid = "juliet@example.net/r".parse().unwrap();
    let mut client = Client::new_with_config(jid, "secret", vec![], config)
        .await
        .unwrap();
    client
        .start_session(true, Some(Presence::available()))
        .await
        .unwrap();
    assert_eq!(client.jid().to_string(), "juliet@example.net/r");
    assert_eq!(client.jid().resource(), Some("r"));

    client.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn sasl_failure_terminates() {
    let (listener, config) = test_server().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut script = Script::new(stream);
        script.read_until("<stream:stream").await;
        script.read_until(">").await;
        script.send(OPEN).await;
        script.send(FEATURES_DIGEST).await;
        script.read_until("<auth").await;
        script.read_until("/>").await;
        script
            .send("<failure xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><not-authorized/></failure>")
            .await;
        script.drain().await;
    });

    let jid: Jid = "juliet@example.net".parse().unwrap();
    let mut client = Client::new_with_config(jid, "wrong", vec![], config)
        .await
        .unwrap();
    match client.start_session(false, None).await {
        Err(Error::Auth(AuthError::Fail(condition))) => assert_eq!(condition, "not-authorized"),
        other => panic!("expected SASL failure, got {:?}", other),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn stream_error_closes_the_pipeline() {
    let (listener, config) = test_server().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut script = Script::new(stream);
        script.read_until("<stream:stream").await;
        script.read_until(">").await;
        script.send(OPEN).await;
        script
            .send("<stream:error><host-unknown xmlns='urn:ietf:params:xml:ns:xmpp-streams'/></stream:error>")
            .await;
        script.drain().await;
    });

    let jid: Jid = "juliet@example.net".parse().unwrap();
    let mut client = Client::new_with_config(jid, "secret", vec![], config)
        .await
        .unwrap();
    match client.start_session(false, None).await {
        Err(Error::Protocol(protocol)) => {
            assert!(format!("{}", protocol).contains("host-unknown"))
        }
        other => panic!("expected stream error, got {:?}", other),
    }
    assert!(client.recv().await.is_none());
    server.await.unwrap();
}

#[tokio::test]
async fn roster_fetch_applies_removals() {
    let (listener, config) = test_server().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut script = Script::new(stream);
        negotiate(&mut script, FEATURES_BIND, "juliet@example.net/r").await;

        let fetch = script.read_until("</iq>").await;
        assert!(fetch.contains("jabber:iq:roster"));
        let id = attr(&fetch, "id").to_owned();
        script
            .send(&format!(
                "<iq id='{}' type='result'><query xmlns='jabber:iq:roster'><item jid='a@example.com' subscription='both'/><item jid='b@example.com' subscription='remove'/></query></iq>",
                id
            ))
            .await;
        script.drain().await;
    });

    let jid: Jid = "juliet@example.net/r".parse().unwrap();
    let mut client =
        Client::new_with_config(jid, "secret", vec![roster::extension()], config)
            .await
            .unwrap();
    client.start_session(false, None).await.unwrap();

    let snapshot = client.roster().await;
    assert_eq!(snapshot.len(), 1);
    let a: Jid = "a@example.com".parse().unwrap();
    assert_eq!(snapshot[&a].subscription.as_deref(), Some("both"));

    client.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn roster_push_is_cached_acknowledged_and_forwarded() {
    let (listener, config) = test_server().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut script = Script::new(stream);
        negotiate(&mut script, FEATURES_BIND, "juliet@example.net/r").await;

        let fetch = script.read_until("</iq>").await;
        let id = attr(&fetch, "id").to_owned();
        script
            .send(&format!(
                "<iq id='{}' type='result'><query xmlns='jabber:iq:roster'/></iq>",
                id
            ))
            .await;

        script
            .send("<iq id='push1' type='set'><query xmlns='jabber:iq:roster'><item jid='c@example.com' subscription='none'/></query></iq>")
            .await;
        // The client must acknowledge the push with a result of the
        // same id.
        script
            .read_until(r#"<iq id="push1" type="result"/>"#)
            .await;
        script.drain().await;
    });

    let jid: Jid = "juliet@example.net/r".parse().unwrap();
    let mut client =
        Client::new_with_config(jid, "secret", vec![roster::extension()], config)
            .await
            .unwrap();
    client.start_session(false, None).await.unwrap();

    // The push is forwarded to the application unchanged.
    let pushed = timeout(Duration::from_secs(5), client.recv())
        .await
        .expect("push delivered")
        .expect("stream open");
    assert_eq!(pushed.id(), Some("push1"));
    assert!(matches!(pushed, Stanza::Iq(_)));

    let snapshot = client.roster().await;
    let c: Jid = "c@example.com".parse().unwrap();
    assert!(snapshot.contains_key(&c));

    client.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn id_correlation_fires_exactly_once() {
    let (listener, config) = test_server().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut script = Script::new(stream);
        negotiate(&mut script, FEATURES_BIND, "juliet@example.net/r").await;

        // Wait for the probe presence so the handler registration has
        // reached the filter, then answer with two unsolicited results:
        // one matching the registered handler, one not.
        script.read_until("probe").await;
        script.send("<iq id='id_7' type='result'/>").await;
        script.send("<iq id='id_8' type='result'/>").await;
        script.drain().await;
    });

    let jid: Jid = "juliet@example.net/r".parse().unwrap();
    let mut client = Client::new_with_config(jid, "secret", vec![], config)
        .await
        .unwrap();
    client.start_session(false, None).await.unwrap();

    // Resource binding consumed id_1.
    assert_eq!(client.next_id().await, "id_2");
    assert_eq!(client.next_id().await, "id_3");

    let (fired_tx, fired_rx) = tokio::sync::oneshot::channel();
    client
        .handle_stanza("id_7", move |stanza| {
            let _ = fired_tx.send(stanza.id().map(str::to_owned));
            false
        })
        .await;
    let mut probe = Presence::available();
    probe.id = Some("probe".to_owned());
    client.send(probe).await.unwrap();

    let fired = timeout(Duration::from_secs(5), fired_rx)
        .await
        .expect("handler invoked")
        .unwrap();
    assert_eq!(fired.as_deref(), Some("id_7"));

    // id_7 was consumed by the handler; id_8 reaches the application.
    let delivered = timeout(Duration::from_secs(5), client.recv())
        .await
        .expect("stanza delivered")
        .expect("stream open");
    assert_eq!(delivered.id(), Some("id_8"));

    client.close().await;
    server.await.unwrap();
}

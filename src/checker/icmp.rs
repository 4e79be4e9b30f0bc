//! ICMP echo checker.
//!
//! Each `check` walks Resolving, Listening, Sending, Awaiting and Validating.
//! The send, the receive and the validation each run as their own task and
//! are raced against the caller's context, so cancellation returns at once
//! even while socket I/O is still blocked. The socket timeouts set before
//! every operation bound how long such an abandoned operation can live.

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::context::{Cancellation, CheckContext, race};
use super::{Checker, Env, strip_scheme};
use crate::config::IcmpConfig;
use crate::error::{AddressError, CheckError, Stage};
use crate::probe::{
    Listen, PacketConn, Protocol, SequenceCounter, SystemListener, echo_payload, get_identifier,
    select_protocol,
};

/// Receive buffer size; replies never exceed one Ethernet MTU
const MAX_DATAGRAM_SIZE: usize = 1500;

/// ICMP echo ("ping") checker for one target
#[derive(Clone)]
pub struct IcmpChecker {
    name: String,
    address: String,
    protocol: Arc<dyn Protocol>,
    config: IcmpConfig,
    identifier: u16,
    payload: Arc<[u8]>,
    sequence: Arc<SequenceCounter>,
    listener: Arc<dyn Listen>,
}

impl IcmpChecker {
    /// Build a checker for `address` (an optional "icmp://" tag is dropped).
    ///
    /// `write_timeout` bounds the request write; the reply wait defaults to
    /// one second and can be overridden through `ICMP_READ_TIMEOUT`.
    pub fn new(
        name: &str,
        address: &str,
        write_timeout: Duration,
        env: &dyn Env,
    ) -> Result<Self, CheckError> {
        let address = strip_scheme(address, "icmp").trim();
        let protocol = select_protocol(address)?;
        let config = IcmpConfig::from_env(write_timeout, env)?;

        Ok(Self {
            name: name.to_string(),
            address: address.to_string(),
            protocol,
            payload: echo_payload(config.payload_size).into(),
            config,
            identifier: get_identifier(),
            sequence: SequenceCounter::global(),
            listener: Arc::new(SystemListener),
        })
    }

    /// Registry constructor
    pub fn boxed(
        name: &str,
        address: &str,
        timeout: Duration,
        env: &dyn Env,
    ) -> Result<Box<dyn Checker>, CheckError> {
        Ok(Box::new(Self::new(name, address, timeout, env)?))
    }

    /// Open packet listeners through `listener` instead of OS sockets
    pub fn with_listener(mut self, listener: Arc<dyn Listen>) -> Self {
        self.listener = listener;
        self
    }

    /// Draw sequence numbers from `sequence` instead of the process-wide counter
    pub fn with_sequence(mut self, sequence: Arc<SequenceCounter>) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn protocol(&self) -> &dyn Protocol {
        self.protocol.as_ref()
    }

    pub fn config(&self) -> &IcmpConfig {
        &self.config
    }

    pub fn read_timeout(&self) -> Duration {
        self.config.read_timeout
    }

    pub fn write_timeout(&self) -> Duration {
        self.config.write_timeout
    }

    pub fn identifier(&self) -> u16 {
        self.identifier
    }

    fn cancelled(&self, stage: Stage, cause: Cancellation) -> CheckError {
        CheckError::Cancelled {
            stage,
            target: self.address.clone(),
            cause,
        }
    }

    fn send_error(&self, source: io::Error) -> CheckError {
        CheckError::Send {
            target: self.address.clone(),
            source,
        }
    }

    fn receive_error(&self, source: io::Error) -> CheckError {
        CheckError::Receive {
            target: self.address.clone(),
            source,
        }
    }

    async fn resolve(&self, ctx: &CheckContext) -> Result<IpAddr, CheckError> {
        let protocol = Arc::clone(&self.protocol);
        let address = self.address.clone();
        let task = tokio::task::spawn_blocking(move || protocol.resolve(&address));

        match race(ctx, task).await {
            Err(cause) => Err(self.cancelled(Stage::Resolving, cause)),
            Ok(Ok(resolved)) => Ok(resolved?),
            Ok(Err(join_err)) => Err(AddressError::Unresolvable {
                host: self.address.clone(),
                source: join_io_error(join_err),
            }
            .into()),
        }
    }

    async fn write_request(
        &self,
        ctx: &CheckContext,
        conn: &Arc<dyn PacketConn>,
        request: Vec<u8>,
        dst: IpAddr,
    ) -> Result<(), CheckError> {
        conn.set_write_timeout(self.config.write_timeout)
            .map_err(|e| self.send_error(e))?;

        let worker = Arc::clone(conn);
        let task = tokio::task::spawn_blocking(move || worker.send_to(&request, dst));

        match race(ctx, task).await {
            Err(cause) => Err(self.cancelled(Stage::Sending, cause)),
            Ok(Ok(Ok(_))) => Ok(()),
            Ok(Ok(Err(e))) => Err(self.send_error(e)),
            Ok(Err(join_err)) => Err(self.send_error(join_io_error(join_err))),
        }
    }

    async fn read_reply(
        &self,
        ctx: &CheckContext,
        conn: &Arc<dyn PacketConn>,
        timeout: Duration,
    ) -> Result<Vec<u8>, CheckError> {
        conn.set_read_timeout(timeout)
            .map_err(|e| self.receive_error(e))?;

        let worker = Arc::clone(conn);
        let task = tokio::task::spawn_blocking(move || {
            let mut reply = vec![0u8; MAX_DATAGRAM_SIZE];
            let len = worker.recv(&mut reply)?;
            reply.truncate(len);
            Ok::<_, io::Error>(reply)
        });

        match race(ctx, task).await {
            Err(cause) => Err(self.cancelled(Stage::Awaiting, cause)),
            Ok(Ok(Ok(reply))) => Ok(reply),
            Ok(Ok(Err(e))) => Err(self.receive_error(e)),
            Ok(Err(join_err)) => Err(self.receive_error(join_io_error(join_err))),
        }
    }

    async fn validate_reply(
        &self,
        ctx: &CheckContext,
        reply: Vec<u8>,
        has_ip_header: bool,
        identifier: u16,
        sequence: u16,
    ) -> Result<(), CheckError> {
        let protocol = Arc::clone(&self.protocol);
        let strict = self.config.strict_checksum;
        let task = tokio::spawn(async move {
            protocol.validate_reply(&reply, has_ip_header, identifier, sequence, strict)
        });

        match race(ctx, task).await {
            Err(cause) => Err(self.cancelled(Stage::Validating, cause)),
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(join_err)) if join_err.is_panic() => {
                std::panic::resume_unwind(join_err.into_panic())
            }
            Ok(Err(_)) => Err(self.cancelled(Stage::Validating, Cancellation::Cancelled)),
        }
    }

    /// Receive until the echo reply arrives or the read timeout runs out.
    ///
    /// Sockets that see every ICMP message on the host also deliver other
    /// programs' traffic and our own looped-back request; those datagrams
    /// are skipped. Anything else is decisive.
    async fn await_reply(
        &self,
        ctx: &CheckContext,
        conn: &Arc<dyn PacketConn>,
        identifier: u16,
        sequence: u16,
    ) -> Result<(), CheckError> {
        let deadline = Instant::now().checked_add(self.config.read_timeout);
        let has_ip_header = conn.has_ip_header();
        let skip_foreign = conn.sees_foreign_traffic();

        loop {
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => self.config.read_timeout,
            };
            if remaining.is_zero() {
                return Err(self.receive_error(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "i/o timeout",
                )));
            }

            let reply = self.read_reply(ctx, conn, remaining).await?;
            match self
                .validate_reply(ctx, reply, has_ip_header, identifier, sequence)
                .await
            {
                Err(CheckError::Validation(err)) if skip_foreign && err.is_foreign() => {
                    trace!(address = %self.address, "Skipping unrelated ICMP message: {err}");
                }
                result => return result,
            }
        }
    }
}

#[async_trait]
impl Checker for IcmpChecker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, ctx: &CheckContext) -> Result<(), CheckError> {
        let dst = self.resolve(ctx).await?;

        // The listener is released when `conn` drops; abandoned I/O tasks hold
        // their own handle until their socket timeout expires
        let conn = self
            .listener
            .listen(self.protocol.as_ref())
            .map_err(CheckError::Listen)?;

        let identifier = conn.kernel_identifier().unwrap_or(self.identifier);
        let sequence = self.sequence.next();
        let request = self.protocol.make_request(identifier, sequence, &self.payload);
        debug!(
            check = %self.name,
            dst = %dst,
            network = self.protocol.network(),
            identifier,
            sequence,
            "Sending ICMP echo request"
        );

        let sent_at = Instant::now();
        self.write_request(ctx, &conn, request, dst).await?;
        self.await_reply(ctx, &conn, identifier, sequence).await?;

        debug!(
            check = %self.name,
            dst = %dst,
            sequence,
            rtt = ?sent_at.elapsed(),
            "ICMP echo reply accepted"
        );
        Ok(())
    }
}

impl fmt::Display for IcmpChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl fmt::Debug for IcmpChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IcmpChecker")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("protocol", &self.protocol)
            .field("config", &self.config)
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

fn join_io_error(err: JoinError) -> io::Error {
    if err.is_panic() {
        std::panic::resume_unwind(err.into_panic());
    }
    io::Error::other(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::probe::{ICMPV4_ECHO_REPLY, ICMPV4_ECHO_REQUEST, build_echo_request};
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet, VecDeque};

    fn no_env(_: &str) -> String {
        String::new()
    }

    /// What the mock connection does on each call
    #[derive(Default)]
    struct MockConn {
        /// Canned datagrams; when empty, an echo reply to the last request
        replies: Mutex<VecDeque<Vec<u8>>>,
        last_request: Mutex<Option<(u16, u16)>>,
        sent: Mutex<Vec<Vec<u8>>>,
        read_delay: Option<Duration>,
        write_error: bool,
        read_error: bool,
        deadline_error: bool,
        foreign_traffic: bool,
        /// Answer every read with someone else's echo reply
        foreign_only: bool,
        kernel_identifier: Option<u16>,
    }

    impl MockConn {
        fn with_replies(replies: Vec<Vec<u8>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                ..Self::default()
            }
        }
    }

    /// 20 byte IPv4 header followed by an echo reply
    fn ipv4_echo_reply(identifier: u16, sequence: u16) -> Vec<u8> {
        let mut reply = vec![0u8; 20];
        reply[0] = 0x45;
        reply.extend(build_echo_request(ICMPV4_ECHO_REPLY, identifier, sequence, &[]));
        reply
    }

    impl PacketConn for MockConn {
        fn send_to(&self, packet: &[u8], _target: IpAddr) -> io::Result<usize> {
            if self.write_error {
                return Err(io::Error::other("mock write error"));
            }
            let id = u16::from_be_bytes([packet[4], packet[5]]);
            let seq = u16::from_be_bytes([packet[6], packet[7]]);
            *self.last_request.lock() = Some((id, seq));
            self.sent.lock().push(packet.to_vec());
            Ok(packet.len())
        }

        fn recv(&self, buffer: &mut [u8]) -> io::Result<usize> {
            if let Some(delay) = self.read_delay {
                std::thread::sleep(delay);
                return Err(io::Error::new(io::ErrorKind::TimedOut, "i/o timeout"));
            }
            if self.read_error {
                return Err(io::Error::other("mock read error"));
            }
            let reply = match self.replies.lock().pop_front() {
                Some(reply) => reply,
                None => {
                    let (id, seq) = self.last_request.lock().unwrap_or_default();
                    if self.foreign_only {
                        std::thread::sleep(Duration::from_millis(5));
                        ipv4_echo_reply(id.wrapping_add(1), seq)
                    } else {
                        ipv4_echo_reply(id, seq)
                    }
                }
            };
            buffer[..reply.len()].copy_from_slice(&reply);
            Ok(reply.len())
        }

        fn set_write_timeout(&self, _timeout: Duration) -> io::Result<()> {
            Ok(())
        }

        fn set_read_timeout(&self, _timeout: Duration) -> io::Result<()> {
            if self.deadline_error {
                return Err(io::Error::other("mock deadline error"));
            }
            Ok(())
        }

        fn has_ip_header(&self) -> bool {
            true
        }

        fn sees_foreign_traffic(&self) -> bool {
            self.foreign_traffic
        }

        fn kernel_identifier(&self) -> Option<u16> {
            self.kernel_identifier
        }
    }

    struct MockListener(Arc<MockConn>);

    impl Listen for MockListener {
        fn listen(&self, _protocol: &dyn Protocol) -> io::Result<Arc<dyn PacketConn>> {
            let conn: Arc<dyn PacketConn> = self.0.clone();
            Ok(conn)
        }
    }

    struct FailingListener;

    impl Listen for FailingListener {
        fn listen(&self, _protocol: &dyn Protocol) -> io::Result<Arc<dyn PacketConn>> {
            Err(io::Error::from(io::ErrorKind::PermissionDenied))
        }
    }

    fn checker_with(conn: MockConn) -> (IcmpChecker, Arc<MockConn>) {
        let conn = Arc::new(conn);
        let checker = IcmpChecker::new("example", "127.0.0.1", Duration::from_secs(1), &no_env)
            .unwrap()
            .with_listener(Arc::new(MockListener(Arc::clone(&conn))));
        (checker, conn)
    }

    fn ctx(timeout: Duration) -> CheckContext {
        CheckContext::new().with_timeout(timeout)
    }

    #[test]
    fn test_valid_config() {
        let env = |key: &str| match key {
            "ICMP_READ_TIMEOUT" => "1s".to_string(),
            _ => String::new(),
        };
        let checker = IcmpChecker::new("example", "127.0.0.1", Duration::from_secs(2), &env).unwrap();

        assert_eq!(checker.to_string(), "example");
        assert_eq!(checker.name(), "example");
        assert_eq!(checker.address(), "127.0.0.1");
        assert_eq!(checker.read_timeout(), Duration::from_secs(1));
        assert_eq!(checker.write_timeout(), Duration::from_secs(2));
        assert_eq!(checker.protocol().network(), "ip4:icmp");
        assert_eq!(checker.identifier(), get_identifier());
    }

    #[test]
    fn test_scheme_is_stripped() {
        let checker = IcmpChecker::new("v6", "icmp://::1", Duration::from_secs(1), &no_env).unwrap();
        assert_eq!(checker.address(), "::1");
        assert!(checker.protocol().is_ipv6());
    }

    #[test]
    fn test_malformed_address() {
        let err = IcmpChecker::new("example", "127001", Duration::from_secs(1), &no_env).unwrap_err();
        assert!(matches!(err, CheckError::Address(AddressError::Invalid(ref a)) if a == "127001"));
        assert_eq!(err.to_string(), "invalid IP address: 127001");
    }

    #[test]
    fn test_malformed_read_timeout() {
        let env: HashMap<&str, &str> = [("ICMP_READ_TIMEOUT", "invalid")].into();
        let env = move |key: &str| env.get(key).map(|v| v.to_string()).unwrap_or_default();
        let err = IcmpChecker::new("example", "127.0.0.1", Duration::from_secs(1), &env).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid ICMP_READ_TIMEOUT value: invalid duration \"invalid\""
        );
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_oversized_read_timeout_rejected() {
        let env = |key: &str| match key {
            "ICMP_READ_TIMEOUT" => "5000000000000000h".to_string(),
            _ => String::new(),
        };
        let err = IcmpChecker::new("example", "127.0.0.1", Duration::from_secs(1), &env).unwrap_err();
        assert!(matches!(err, CheckError::Config(_)));
    }

    #[tokio::test]
    async fn test_unrepresentable_read_timeout_does_not_panic() {
        let (checker, _) = checker_with(MockConn::default());
        let checker = checker.with_read_timeout(Duration::MAX);
        checker
            .check(&CheckContext::new().with_timeout(Duration::MAX))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_valid_check() {
        let (checker, conn) = checker_with(MockConn::default());
        checker.check(&ctx(Duration::from_secs(4))).await.unwrap();

        let sent = conn.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0][0], ICMPV4_ECHO_REQUEST);
        assert_eq!(crate::probe::checksum(&sent[0]), 0);
    }

    #[tokio::test]
    async fn test_listen_error() {
        let checker = IcmpChecker::new("example", "127.0.0.1", Duration::from_secs(1), &no_env)
            .unwrap()
            .with_listener(Arc::new(FailingListener));
        let err = checker.check(&CheckContext::new()).await.unwrap_err();
        assert!(matches!(err, CheckError::Listen(_)));
        assert!(err.to_string().starts_with("failed to listen for ICMP packets"));
    }

    #[tokio::test]
    async fn test_invalid_response() {
        let (checker, _) = checker_with(MockConn::with_replies(vec![vec![1, 2, 3, 4]]));
        let err = checker.check(&CheckContext::new()).await.unwrap_err();
        assert!(matches!(
            err,
            CheckError::Validation(ValidationError::ShortReply { .. })
        ));
    }

    #[tokio::test]
    async fn test_deadline_error() {
        let (checker, _) = checker_with(MockConn {
            deadline_error: true,
            ..MockConn::default()
        });
        let err = checker.check(&ctx(Duration::from_secs(4))).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to read ICMP reply from 127.0.0.1: mock deadline error"
        );
    }

    #[tokio::test]
    async fn test_write_error() {
        let (checker, _) = checker_with(MockConn {
            write_error: true,
            ..MockConn::default()
        });
        let err = checker.check(&ctx(Duration::from_secs(4))).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to send ICMP request to 127.0.0.1: mock write error"
        );
    }

    #[tokio::test]
    async fn test_read_error() {
        let (checker, _) = checker_with(MockConn {
            read_error: true,
            ..MockConn::default()
        });
        let err = checker.check(&ctx(Duration::from_secs(4))).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to read ICMP reply from 127.0.0.1: mock read error"
        );
    }

    #[tokio::test]
    async fn test_context_cancelled_while_waiting() {
        let (checker, _) = checker_with(MockConn {
            read_delay: Some(Duration::from_secs(2)),
            ..MockConn::default()
        });
        let checker = checker.with_read_timeout(Duration::from_secs(5));

        let started = std::time::Instant::now();
        let err = checker.check(&ctx(Duration::from_millis(300))).await.unwrap_err();
        let elapsed = started.elapsed();

        assert_eq!(
            err.to_string(),
            "context cancelled while waiting for ICMP reply from 127.0.0.1: context deadline exceeded"
        );
        assert!(elapsed >= Duration::from_millis(300), "returned early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "waited for the read: {elapsed:?}");
    }

    #[tokio::test]
    async fn test_already_cancelled_context() {
        let (checker, conn) = checker_with(MockConn::default());
        let ctx = CheckContext::new();
        ctx.cancel();
        let err = checker.check(&ctx).await.unwrap_err();
        assert!(matches!(
            err,
            CheckError::Cancelled {
                stage: Stage::Resolving,
                cause: Cancellation::Cancelled,
                ..
            }
        ));
        assert!(conn.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_traffic_is_skipped() {
        let (checker, conn) = checker_with(MockConn {
            foreign_traffic: true,
            ..MockConn::default()
        });
        // Someone else's reply and a looped-back request arrive first
        let identifier = checker.identifier();
        {
            let mut replies = conn.replies.lock();
            replies.push_back(ipv4_echo_reply(identifier.wrapping_add(1), 1));
            let mut looped = vec![0u8; 20];
            looped[0] = 0x45;
            looped.extend(build_echo_request(ICMPV4_ECHO_REQUEST, identifier, 1, &[]));
            replies.push_back(looped);
        }
        checker.check(&ctx(Duration::from_secs(4))).await.unwrap();
    }

    #[tokio::test]
    async fn test_identity_mismatch_is_decisive_without_foreign_traffic() {
        let (checker, conn) = checker_with(MockConn::default());
        let checker = checker.with_sequence(Arc::new(SequenceCounter::new()));
        conn.replies
            .lock()
            .push_back(ipv4_echo_reply(checker.identifier().wrapping_add(1), 1));

        let err = checker.check(&ctx(Duration::from_secs(4))).await.unwrap_err();
        assert!(matches!(
            err,
            CheckError::Validation(ValidationError::IdentityMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_foreign_traffic_until_timeout() {
        let (checker, _) = checker_with(MockConn {
            foreign_traffic: true,
            foreign_only: true,
            ..MockConn::default()
        });
        let checker = checker.with_read_timeout(Duration::from_millis(50));
        let err = checker.check(&ctx(Duration::from_secs(4))).await.unwrap_err();
        assert!(matches!(err, CheckError::Receive { ref source, .. } if source.kind() == io::ErrorKind::TimedOut));
        assert_eq!(
            err.to_string(),
            "failed to read ICMP reply from 127.0.0.1: i/o timeout"
        );
    }

    #[tokio::test]
    async fn test_kernel_identifier_is_used() {
        let (checker, conn) = checker_with(MockConn {
            kernel_identifier: Some(0xBEEF),
            ..MockConn::default()
        });
        checker.check(&ctx(Duration::from_secs(4))).await.unwrap();
        let (id, _) = conn.last_request.lock().unwrap();
        assert_eq!(id, 0xBEEF);
    }

    #[tokio::test]
    async fn test_strict_checksum() {
        let env = |key: &str| match key {
            "ICMP_STRICT_CHECKSUM" => "true".to_string(),
            _ => String::new(),
        };
        let conn = Arc::new(MockConn::default());
        let checker = IcmpChecker::new("example", "127.0.0.1", Duration::from_secs(1), &env)
            .unwrap()
            .with_listener(Arc::new(MockListener(Arc::clone(&conn))));

        // A fresh counter makes the first sequence number 1
        let checker = checker.with_sequence(Arc::new(SequenceCounter::new()));
        let mut reply = ipv4_echo_reply(checker.identifier(), 1);
        reply[22] ^= 0xFF;
        conn.replies.lock().push_back(reply);

        let err = checker.check(&ctx(Duration::from_secs(4))).await.unwrap_err();
        assert!(matches!(
            err,
            CheckError::Validation(ValidationError::ChecksumMismatch(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checks_use_distinct_sequences() {
        let sequence = Arc::new(SequenceCounter::new());
        let mut tasks = tokio::task::JoinSet::new();
        let mut conns = Vec::new();

        for i in 0..16 {
            let conn = Arc::new(MockConn::default());
            conns.push(Arc::clone(&conn));
            let address = format!("127.0.0.{}", i + 1);
            let checker = IcmpChecker::new(&format!("probe-{i}"), &address, Duration::from_secs(1), &no_env)
                .unwrap()
                .with_listener(Arc::new(MockListener(conn)))
                .with_sequence(Arc::clone(&sequence));
            tasks.spawn(async move { checker.check(&ctx(Duration::from_secs(4))).await });
        }

        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }

        let sequences: HashSet<u16> = conns
            .iter()
            .map(|conn| conn.last_request.lock().unwrap().1)
            .collect();
        assert_eq!(sequences.len(), 16);
    }
}

//! The upstream transport and the validating facade.
//!
//! `UpstreamResolver` is a plain stub client: UDP with retry and failover
//! across the configured servers, falling back to TCP when an answer comes
//! back truncated. Every outgoing query carries RD, CD and the DO bit so
//! the recursive upstream returns raw signed data without filtering.
//!
//! `ValidatingResolver` is the public entry point: forward, validate,
//! stamp AD or rewrite to SERVFAIL.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::dns::edns::EdnsOpt;
use crate::dns::enums::{RecordClass, RecordType, ResponseCode};
use crate::dns::name::Name;
use crate::dns::DnsPacket;
use crate::dnssec::constants::DNSSEC_UDP_SIZE;
use crate::dnssec::keycache::KeyCache;
use crate::dnssec::trust_anchor::TrustAnchorStore;
use crate::dnssec::validator::{PrimingResolver, Validator};
use crate::error::ResolveError;
use crate::smessage::{SMessage, SecurityStatus};

/// Stub client for the recursive upstream.
pub struct UpstreamResolver {
    servers: Vec<SocketAddr>,
    timeout: Duration,
    max_retries: u8,
}

impl UpstreamResolver {
    pub fn new(servers: Vec<SocketAddr>, timeout: Duration, max_retries: u8) -> Self {
        UpstreamResolver {
            servers,
            timeout,
            max_retries,
        }
    }

    fn build_query(name: Name, rtype: RecordType, rclass: RecordClass) -> DnsPacket {
        let id = rand::thread_rng().gen();
        let mut query = DnsPacket::query(id, name, rtype, rclass);
        // CD keeps the upstream from withholding data it considers bogus;
        // we do our own judging. DO asks for the signatures.
        query.header.cd = true;
        query.edns = Some(EdnsOpt::dnssec_ok(DNSSEC_UDP_SIZE));
        query
    }

    async fn exchange_udp(
        &self,
        server: SocketAddr,
        wire: &[u8],
        id: u16,
    ) -> Result<DnsPacket, ResolveError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(server).await?;
        socket.send(wire).await?;

        let mut buf = vec![0u8; DNSSEC_UDP_SIZE as usize];
        let len = tokio::time::timeout(self.timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| ResolveError::Timeout)??;

        let packet = DnsPacket::parse(&buf[..len])?;
        if packet.header.id != id || !packet.header.qr {
            return Err(ResolveError::Mismatch);
        }
        Ok(packet)
    }

    async fn exchange_tcp(
        &self,
        server: SocketAddr,
        wire: &[u8],
        id: u16,
    ) -> Result<DnsPacket, ResolveError> {
        let mut stream = tokio::time::timeout(self.timeout, TcpStream::connect(server))
            .await
            .map_err(|_| ResolveError::Timeout)??;

        let mut framed = Vec::with_capacity(wire.len() + 2);
        framed.extend_from_slice(&(wire.len() as u16).to_be_bytes());
        framed.extend_from_slice(wire);
        stream.write_all(&framed).await?;

        let exchange = async {
            let mut len_buf = [0u8; 2];
            stream.read_exact(&mut len_buf).await?;
            let len = u16::from_be_bytes(len_buf) as usize;
            let mut buf = vec![0u8; len];
            stream.read_exact(&mut buf).await?;
            Ok::<_, std::io::Error>(buf)
        };
        let buf = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ResolveError::Timeout)??;

        let packet = DnsPacket::parse(&buf)?;
        if packet.header.id != id || !packet.header.qr {
            return Err(ResolveError::Mismatch);
        }
        Ok(packet)
    }
}

#[async_trait]
impl PrimingResolver for UpstreamResolver {
    async fn send(
        &self,
        name: Name,
        rtype: RecordType,
        rclass: RecordClass,
    ) -> Result<DnsPacket, ResolveError> {
        let query = Self::build_query(name, rtype, rclass);
        let id = query.header.id;
        let wire = query.serialize()?;

        let mut last_error = ResolveError::NoUpstream;
        for attempt in 0..=self.max_retries {
            for &server in &self.servers {
                trace!(
                    "upstream {} attempt {} for {} {}",
                    server,
                    attempt,
                    query.questions[0].name,
                    query.questions[0].qtype
                );
                match self.exchange_udp(server, &wire, id).await {
                    Ok(packet) if packet.header.tc => {
                        debug!("truncated answer from {}, retrying over TCP", server);
                        match self.exchange_tcp(server, &wire, id).await {
                            Ok(packet) => return Ok(packet),
                            Err(error) => last_error = error,
                        }
                    }
                    Ok(packet) => return Ok(packet),
                    Err(error) => {
                        debug!("upstream {} failed: {}", server, error);
                        last_error = error;
                    }
                }
            }
        }

        Err(last_error)
    }
}

/// A validated response: the wire packet to hand back plus the verdict and
/// the reason token when the verdict needed one.
#[derive(Clone, Debug)]
pub struct ValidatedResponse {
    pub packet: DnsPacket,
    pub security: SecurityStatus,
    pub reason: Option<String>,
}

/// The facade: one `send` that forwards a query upstream, validates the
/// answer and returns it annotated.
pub struct ValidatingResolver {
    upstream: Arc<dyn PrimingResolver>,
    validator: Validator,
    query_budget: Duration,
}

impl ValidatingResolver {
    pub fn new(
        upstream: Arc<dyn PrimingResolver>,
        anchors: Arc<TrustAnchorStore>,
        key_cache: Arc<KeyCache>,
        config: &Config,
    ) -> Self {
        ValidatingResolver {
            upstream,
            validator: config.build_validator(anchors, key_cache),
            query_budget: config.query_budget,
        }
    }

    /// Forward `query` and validate the response. Transport failures
    /// propagate as errors; security failures come back as SERVFAIL
    /// packets with a reason token.
    pub async fn send(&self, query: &DnsPacket) -> Result<ValidatedResponse, ResolveError> {
        let Some(question) = query.questions.first().cloned() else {
            return Err(ResolveError::Mismatch);
        };

        let cancel = CancellationToken::new();
        let work = self.resolve_and_validate(&question.name, question.qtype, question.qclass, &cancel);

        let mut message = match tokio::time::timeout(self.query_budget, work).await {
            Ok(result) => result?,
            Err(_) => {
                cancel.cancel();
                return Err(ResolveError::Timeout);
            }
        };

        Ok(self.finish(query, &mut message))
    }

    async fn resolve_and_validate(
        &self,
        qname: &Name,
        qtype: RecordType,
        qclass: RecordClass,
        cancel: &CancellationToken,
    ) -> Result<SMessage, ResolveError> {
        let packet = self
            .upstream
            .send(qname.clone(), qtype, qclass)
            .await?;
        let mut message = SMessage::from_packet(&packet);
        self.validator
            .validate(self.upstream.as_ref(), &mut message, cancel)
            .await?;
        Ok(message)
    }

    /// Stamp the wire response: AD only for SECURE answers to clients that
    /// asked for it, SERVFAIL for BOGUS with the original sections kept
    /// for debugging, CD always cleared on the way out.
    fn finish(&self, query: &DnsPacket, message: &mut SMessage) -> ValidatedResponse {
        let security = message.security();
        let reason = message.bogus_reason().map(str::to_string);

        let client_wants_ad =
            query.header.ad || query.edns.as_ref().map_or(false, EdnsOpt::dnssec_do);

        let mut packet = message.to_packet();
        packet.header.id = query.header.id;
        packet.header.qr = true;
        packet.header.cd = false;
        packet.header.ad = security == SecurityStatus::Secure && client_wants_ad;

        if security == SecurityStatus::Bogus {
            warn!(
                "validation failed for {} {}: {}",
                query.questions[0].name,
                query.questions[0].qtype,
                reason.as_deref().unwrap_or("unknown")
            );
            packet.header.rcode = ResponseCode::ServFail.low_bits();
            if let Some(edns) = packet.edns.as_mut() {
                edns.extended_rcode = 0;
            }
        }

        ValidatedResponse {
            packet,
            security,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_carries_do_and_cd() {
        let query = UpstreamResolver::build_query(
            Name::parse("example.com").unwrap(),
            RecordType::A,
            RecordClass::In,
        );
        assert!(query.header.cd);
        assert!(query.header.rd);
        assert!(query.edns.as_ref().unwrap().dnssec_do());
    }
}

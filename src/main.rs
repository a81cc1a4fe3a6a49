use std::sync::Arc;

use tokio::net::{TcpListener, UdpSocket};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vordr::config::Config;
use vordr::dns::DnsPacket;
use vordr::dnssec::keycache::KeyCache;
use vordr::resolver::{UpstreamResolver, ValidatingResolver};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    if config.worker_threads > 0 {
        runtime_builder.worker_threads(config.worker_threads);
    }
    let runtime = runtime_builder
        .enable_all()
        .thread_name("vordr-worker")
        .build()?;

    runtime.block_on(async_main(config))
}

async fn async_main(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vordr=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("vordr validating resolver starting");
    info!(
        "upstreams: {:?}, bind: {}, anchors: {:?}",
        config.upstream_servers, config.bind_addr, config.trust_anchor_file
    );

    let anchors = config.load_trust_anchors()?;
    if anchors.is_empty() {
        warn!("no trust anchors configured; every answer will be INDETERMINATE");
    }
    let key_cache = Arc::new(KeyCache::new(config.keycache_max_entries));
    let upstream = Arc::new(UpstreamResolver::new(
        config.upstream_servers.clone(),
        config.upstream_timeout,
        config.max_retries,
    ));
    let resolver = Arc::new(ValidatingResolver::new(
        upstream,
        anchors,
        key_cache,
        &config,
    ));

    let udp = Arc::new(UdpSocket::bind(config.bind_addr).await?);
    let tcp = TcpListener::bind(config.bind_addr).await?;
    info!("listening on {} (udp+tcp)", config.bind_addr);

    let udp_resolver = Arc::clone(&resolver);
    let udp_task = tokio::spawn(serve_udp(udp, udp_resolver));
    let tcp_task = tokio::spawn(serve_tcp(tcp, resolver));

    tokio::select! {
        result = udp_task => result??,
        result = tcp_task => result??,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }

    Ok(())
}

async fn serve_udp(
    socket: Arc<UdpSocket>,
    resolver: Arc<ValidatingResolver>,
) -> Result<(), std::io::Error> {
    let mut buf = vec![0u8; 4096];
    loop {
        let (len, peer) = socket.recv_from(&mut buf).await?;
        let data = buf[..len].to_vec();
        let socket = Arc::clone(&socket);
        let resolver = Arc::clone(&resolver);

        tokio::spawn(async move {
            match handle_query(&resolver, &data).await {
                Ok(reply) => {
                    if let Err(error) = socket.send_to(&reply, peer).await {
                        warn!("udp reply to {} failed: {}", peer, error);
                    }
                }
                Err(error) => debug!("query from {} dropped: {}", peer, error),
            }
        });
    }
}

async fn serve_tcp(
    listener: TcpListener,
    resolver: Arc<ValidatingResolver>,
) -> Result<(), std::io::Error> {
    loop {
        let (mut stream, peer) = listener.accept().await?;
        let resolver = Arc::clone(&resolver);

        tokio::spawn(async move {
            let mut len_buf = [0u8; 2];
            if stream.read_exact(&mut len_buf).await.is_err() {
                return;
            }
            let len = u16::from_be_bytes(len_buf) as usize;
            let mut data = vec![0u8; len];
            if stream.read_exact(&mut data).await.is_err() {
                return;
            }

            match handle_query(&resolver, &data).await {
                Ok(reply) => {
                    let mut framed = Vec::with_capacity(reply.len() + 2);
                    framed.extend_from_slice(&(reply.len() as u16).to_be_bytes());
                    framed.extend_from_slice(&reply);
                    if let Err(error) = stream.write_all(&framed).await {
                        warn!("tcp reply to {} failed: {}", peer, error);
                    }
                }
                Err(error) => debug!("query from {} dropped: {}", peer, error),
            }
        });
    }
}

async fn handle_query(
    resolver: &ValidatingResolver,
    data: &[u8],
) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
    let query = DnsPacket::parse(data)?;
    let validated = resolver.send(&query).await;

    match validated {
        Ok(response) => {
            if let Some(reason) = &response.reason {
                debug!("verdict {} ({})", response.security, reason);
            }
            Ok(response.packet.serialize()?)
        }
        Err(error) => {
            error!("resolution failed: {}", error);
            // Transport failure: tell the client SERVFAIL with empty
            // sections rather than silence.
            let mut reply = query.clone();
            reply.header.qr = true;
            reply.header.rcode = 2;
            reply.header.ad = false;
            Ok(reply.serialize()?)
        }
    }
}

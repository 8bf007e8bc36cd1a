//! DNS Server Adapter
//!
//! Serves the DNS router over UDP and TCP. `DnsHandler` additionally plugs
//! the router into hickory-server's `RequestHandler` for embedding in a
//! `ServerFuture`.

use crate::application::{DnsRouter, Transport};
use crate::infrastructure::ShutdownController;
use hickory_proto::op::{Header, Message, MessageType, ResponseCode};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder};
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Protocol, Request, RequestHandler, ResponseHandler, ResponseInfo};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

/// Largest datagram read from a client.
const MAX_DATAGRAM: usize = 4096;

/// Idle time after which a TCP client is disconnected.
const TCP_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// hickory-server request handler backed by the DNS router.
pub struct DnsHandler {
    router: Arc<DnsRouter>,
}

impl DnsHandler {
    pub fn new(router: Arc<DnsRouter>) -> Self {
        Self { router }
    }
}

#[async_trait::async_trait]
impl RequestHandler for DnsHandler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        let query = request.query();
        tracing::debug!(
            "DNS query: {} {} from {}",
            query.name(),
            query.query_type(),
            request.src()
        );

        let edns_payload = request.edns().map(|e| e.max_payload());
        let transport = match request.protocol() {
            Protocol::Udp => Transport::Udp { edns_payload },
            _ => Transport::Stream { edns_payload },
        };

        let reply = self
            .router
            .route(request.header(), query.original(), transport)
            .await;
        let message = &reply.message;
        let header = *message.header();

        let mut builder = MessageResponseBuilder::from_message_request(request);
        if let Some(edns) = message.extensions() {
            builder.edns(edns.clone());
        }
        let response = builder.build(
            header,
            message.answers().iter(),
            message.name_servers().iter(),
            std::iter::empty(),
            message.additionals().iter(),
        );

        response_handle.send_response(response).await.unwrap_or_else(|e| {
            tracing::error!("DNS response error: {:?}", e);
            header.into()
        })
    }
}

/// Decode a request, answer it, and encode the reply.
///
/// A message whose header is readable but whose body is not gets `FormErr`.
/// Responses sent to us are ignored.
pub async fn answer_packet(router: &DnsRouter, data: &[u8], stream: bool) -> anyhow::Result<Vec<u8>> {
    let request = match Message::from_vec(data) {
        Ok(message) => message,
        Err(e) => {
            let header = Header::read(&mut BinDecoder::new(data))?;
            tracing::debug!("malformed DNS message {}: {}", header.id(), e);
            let reply = Message::error_msg(header.id(), header.op_code(), ResponseCode::FormErr);
            return Ok(reply.to_vec()?);
        }
    };

    if request.message_type() != MessageType::Query {
        anyhow::bail!("ignoring DNS response message {}", request.id());
    }

    let reply = router.route_message(&request, stream).await;
    Ok(reply.to_wire()?)
}

/// UDP + TCP DNS server.
pub struct DnsServer {
    udp: Arc<UdpSocket>,
    tcp: TcpListener,
    router: Arc<DnsRouter>,
}

impl DnsServer {
    /// Bind UDP and TCP on the same address.
    ///
    /// With port 0 the TCP listener reuses the port the UDP socket got.
    pub async fn bind(listen_addr: &str, router: Arc<DnsRouter>) -> anyhow::Result<Self> {
        let addr: SocketAddr = listen_addr.parse()?;
        let udp = UdpSocket::bind(addr).await?;
        let tcp = TcpListener::bind(udp.local_addr()?).await?;

        Ok(Self {
            udp: Arc::new(udp),
            tcp,
            router,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.udp.local_addr()?)
    }

    /// Serve until shutdown is signalled.
    ///
    /// Each datagram and each TCP connection is handled on its own task.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub async fn run(self, shutdown: ShutdownController) -> anyhow::Result<()> {
        tracing::info!("DNS server listening on {} (udp+tcp)", self.local_addr()?);

        let mut shutdown_rx = shutdown.subscribe();
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("DNS server stopping");
                    return Ok(());
                }
                received = self.udp.recv_from(&mut buf) => match received {
                    Ok((len, src)) => {
                        let data = buf[..len].to_vec();
                        let socket = self.udp.clone();
                        let router = self.router.clone();

                        tokio::spawn(async move {
                            if let Err(e) = Self::handle_datagram(&router, &socket, &data, src).await {
                                tracing::debug!("DNS packet error from {}: {:?}", src, e);
                            }
                        });
                    }
                    Err(e) => tracing::error!("DNS recv error: {:?}", e),
                },
                accepted = self.tcp.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let router = self.router.clone();
                        let guard = shutdown.connection_guard();

                        tokio::spawn(async move {
                            let _guard = guard;
                            if let Err(e) = Self::handle_stream(&router, stream).await {
                                tracing::debug!("DNS TCP error from {}: {:?}", peer, e);
                            }
                        });
                    }
                    Err(e) => tracing::error!("DNS accept error: {:?}", e),
                },
            }
        }
    }

    async fn handle_datagram(
        router: &DnsRouter,
        socket: &UdpSocket,
        data: &[u8],
        src: SocketAddr,
    ) -> anyhow::Result<()> {
        let reply = answer_packet(router, data, false).await?;
        socket.send_to(&reply, src).await?;
        Ok(())
    }

    /// Serve length-prefixed messages until the client closes or idles out.
    async fn handle_stream(router: &DnsRouter, mut stream: TcpStream) -> anyhow::Result<()> {
        loop {
            let len = match tokio::time::timeout(TCP_IDLE_TIMEOUT, stream.read_u16()).await {
                Ok(Ok(len)) => len as usize,
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Ok(()),
            };

            let mut data = vec![0u8; len];
            stream.read_exact(&mut data).await?;

            let reply = answer_packet(router, &data, true).await?;
            stream.write_u16(reply.len() as u16).await?;
            stream.write_all(&reply).await?;
            stream.flush().await?;
        }
    }
}

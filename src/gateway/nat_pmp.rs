//! [`MappingClient`] backed by the `natpmp` crate's tokio client

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use async_trait::async_trait;
use natpmp::{new_tokio_natpmp_with, NatpmpAsync, Response};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

use super::{
    ExternalAddress, GatewayError, MappingClient, PortMapping, PortMappingRequest, Protocol,
};

/// NAT-PMP client that opens a fresh UDP socket per exchange
///
/// The `natpmp` crate retransmits unanswered requests with its own backoff,
/// which can stretch to a minute. Every exchange is bounded by `timeout` so
/// a lost gateway never wedges a reconcile worker.
#[derive(Clone, Debug)]
pub struct NatPmpGateway {
    timeout: Duration,
}

impl NatPmpGateway {
    /// Create a client with the given per-exchange timeout
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Per-exchange timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn connect(&self, gateway: IpAddr) -> Result<NatpmpAsync<UdpSocket>, GatewayError> {
        let gateway = ipv4_gateway(gateway)?;
        new_tokio_natpmp_with(gateway)
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))
    }
}

#[async_trait]
impl MappingClient for NatPmpGateway {
    async fn get_external_address(
        &self,
        gateway: IpAddr,
    ) -> Result<ExternalAddress, GatewayError> {
        let mut client = self.connect(gateway).await?;

        let exchange = async move {
            client
                .send_public_address_request()
                .await
                .map_err(|e| GatewayError::Request(e.to_string()))?;

            match client
                .read_response_or_retry()
                .await
                .map_err(|e| GatewayError::Request(e.to_string()))?
            {
                Response::Gateway(gr) => Ok(ExternalAddress {
                    ip: IpAddr::V4(*gr.public_address()),
                    seconds_since_start_of_epoch: gr.epoch(),
                }),
                other => Err(GatewayError::UnexpectedResponse(format!(
                    "expected public address response, got {other:?}"
                ))),
            }
        };

        let address = timeout(self.timeout, exchange)
            .await
            .map_err(|_| GatewayError::Timeout(self.timeout))??;

        debug!(%gateway, external_ip = %address.ip, "gateway reported external address");
        Ok(address)
    }

    async fn add_port_mapping(
        &self,
        gateway: IpAddr,
        request: PortMappingRequest,
    ) -> Result<PortMapping, GatewayError> {
        let mut client = self.connect(gateway).await?;

        let exchange = async move {
            client
                .send_port_mapping_request(
                    to_natpmp_protocol(request.protocol),
                    request.internal_port,
                    request.external_port,
                    request.lifetime,
                )
                .await
                .map_err(|e| GatewayError::Request(e.to_string()))?;

            let response = client
                .read_response_or_retry()
                .await
                .map_err(|e| GatewayError::Request(e.to_string()))?;

            match (request.protocol, response) {
                (Protocol::Tcp, Response::TCP(mr)) | (Protocol::Udp, Response::UDP(mr)) => {
                    Ok(PortMapping {
                        internal_port: mr.private_port(),
                        external_port: mr.public_port(),
                        lifetime: u32::try_from(mr.lifetime().as_secs()).unwrap_or(u32::MAX),
                        seconds_since_start_of_epoch: mr.epoch(),
                    })
                }
                (protocol, other) => Err(GatewayError::UnexpectedResponse(format!(
                    "expected {protocol} mapping response, got {other:?}"
                ))),
            }
        };

        let mapping = timeout(self.timeout, exchange)
            .await
            .map_err(|_| GatewayError::Timeout(self.timeout))??;

        debug!(
            %gateway,
            protocol = %request.protocol,
            internal_port = mapping.internal_port,
            external_port = mapping.external_port,
            lifetime = mapping.lifetime,
            "gateway granted port mapping"
        );
        Ok(mapping)
    }
}

fn ipv4_gateway(gateway: IpAddr) -> Result<Ipv4Addr, GatewayError> {
    match gateway {
        IpAddr::V4(v4) => Ok(v4),
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .ok_or(GatewayError::UnsupportedGateway(gateway)),
    }
}

fn to_natpmp_protocol(protocol: Protocol) -> natpmp::Protocol {
    match protocol {
        Protocol::Tcp => natpmp::Protocol::TCP,
        Protocol::Udp => natpmp::Protocol::UDP,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_gateways_are_accepted() {
        let gw: IpAddr = "192.168.1.1".parse().unwrap();
        assert_eq!(ipv4_gateway(gw).unwrap(), Ipv4Addr::new(192, 168, 1, 1));
    }

    #[test]
    fn ipv4_mapped_ipv6_gateways_are_unwrapped() {
        let gw: IpAddr = "::ffff:192.168.1.1".parse().unwrap();
        assert_eq!(ipv4_gateway(gw).unwrap(), Ipv4Addr::new(192, 168, 1, 1));
    }

    #[test]
    fn plain_ipv6_gateways_are_rejected() {
        let gw: IpAddr = "2001:db8::1".parse().unwrap();
        assert_eq!(
            ipv4_gateway(gw).unwrap_err(),
            GatewayError::UnsupportedGateway(gw)
        );
    }

    #[test]
    fn timeout_is_configurable() {
        let gateway = NatPmpGateway::new(Duration::from_secs(3));
        assert_eq!(gateway.timeout(), Duration::from_secs(3));
    }

    // =========================================================================
    // Exchange Stories
    // =========================================================================

    /// Answer one public address request and one TCP mapping request the
    /// way a NAT-PMP gateway on loopback would.
    async fn answer_two_requests(socket: UdpSocket) {
        let mut buf = [0u8; 16];

        let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &[0, 0]);
        let mut reply = vec![0, 128, 0, 0];
        reply.extend_from_slice(&42u32.to_be_bytes());
        reply.extend_from_slice(&[203, 0, 113, 7]);
        socket.send_to(&reply, peer).await.unwrap();

        let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
        assert_eq!(len, 12);
        assert_eq!(buf[1], 2, "TCP mapping opcode");
        let mut reply = vec![0, 130, 0, 0];
        reply.extend_from_slice(&43u32.to_be_bytes());
        reply.extend_from_slice(&buf[4..6]);
        reply.extend_from_slice(&9090u16.to_be_bytes());
        reply.extend_from_slice(&1800u32.to_be_bytes());
        socket.send_to(&reply, peer).await.unwrap();
    }

    /// Story: Both exchanges decode the gateway's answers
    #[tokio::test]
    async fn story_loopback_gateway_grants_mapping() {
        let Ok(socket) = UdpSocket::bind(("127.0.0.1", 5351)).await else {
            eprintln!("NAT-PMP port 5351 is busy on loopback, skipping");
            return;
        };
        let responder = tokio::spawn(answer_two_requests(socket));
        let gateway = NatPmpGateway::new(Duration::from_secs(5));
        let loopback: IpAddr = "127.0.0.1".parse().unwrap();

        let address = gateway.get_external_address(loopback).await.unwrap();
        assert_eq!(address.ip, "203.0.113.7".parse::<IpAddr>().unwrap());
        assert_eq!(address.seconds_since_start_of_epoch, 42);

        let request = PortMappingRequest {
            protocol: Protocol::Tcp,
            internal_port: 8080,
            external_port: 80,
            lifetime: 3600,
        };
        let mapping = gateway.add_port_mapping(loopback, request).await.unwrap();
        assert_eq!(
            mapping,
            PortMapping {
                internal_port: 8080,
                external_port: 9090,
                lifetime: 1800,
                seconds_since_start_of_epoch: 43,
            }
        );

        responder.await.unwrap();
    }

    /// Story: A gateway that never answers fails with a timeout
    #[tokio::test]
    async fn story_silent_gateway_times_out() {
        // TEST-NET-1 is never routed, so nothing answers
        let gateway = NatPmpGateway::new(Duration::from_millis(200));
        let silent: IpAddr = "192.0.2.1".parse().unwrap();

        let err = gateway.get_external_address(silent).await.unwrap_err();
        assert!(
            matches!(err, GatewayError::Timeout(_) | GatewayError::Request(_)),
            "unexpected error: {err:?}"
        );
    }
}

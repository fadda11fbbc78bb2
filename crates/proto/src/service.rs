//! Tonic client stubs for the four Fabric services.
//!
//! These follow the shape `tonic-build` emits for the canonical service
//! definitions:
//!
//! ```text
//! protos.Endorser/ProcessProposal       unary
//! orderer.AtomicBroadcast/Broadcast     bidi stream
//! orderer.AtomicBroadcast/Deliver       bidi stream
//! protos.Events/Chat                    bidi stream
//! discovery.Discovery/Discover          unary
//! ```

pub mod endorser_client {
    use tonic::codegen::http::uri::PathAndQuery;
    use tonic::codegen::*;

    use crate::proposal::{ProposalResponse, SignedProposal};

    /// Client for the peer endorsement service.
    #[derive(Debug, Clone)]
    pub struct EndorserClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl<T> EndorserClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            Self { inner: tonic::client::Grpc::new(inner) }
        }

        pub async fn process_proposal(
            &mut self,
            request: impl tonic::IntoRequest<SignedProposal>,
        ) -> Result<tonic::Response<ProposalResponse>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = PathAndQuery::from_static("/protos.Endorser/ProcessProposal");
            self.inner.unary(request.into_request(), path, codec).await
        }
    }
}

pub mod atomic_broadcast_client {
    use tonic::codegen::http::uri::PathAndQuery;
    use tonic::codegen::*;

    use crate::common::Envelope;
    use crate::orderer::{BroadcastResponse, DeliverResponse};

    /// Client for the ordering service.
    #[derive(Debug, Clone)]
    pub struct AtomicBroadcastClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl<T> AtomicBroadcastClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            Self { inner: tonic::client::Grpc::new(inner) }
        }

        pub async fn broadcast(
            &mut self,
            request: impl tonic::IntoStreamingRequest<Message = Envelope>,
        ) -> Result<tonic::Response<tonic::codec::Streaming<BroadcastResponse>>, tonic::Status>
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = PathAndQuery::from_static("/orderer.AtomicBroadcast/Broadcast");
            self.inner
                .streaming(request.into_streaming_request(), path, codec)
                .await
        }

        pub async fn deliver(
            &mut self,
            request: impl tonic::IntoStreamingRequest<Message = Envelope>,
        ) -> Result<tonic::Response<tonic::codec::Streaming<DeliverResponse>>, tonic::Status>
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = PathAndQuery::from_static("/orderer.AtomicBroadcast/Deliver");
            self.inner
                .streaming(request.into_streaming_request(), path, codec)
                .await
        }
    }
}

pub mod events_client {
    use tonic::codegen::http::uri::PathAndQuery;
    use tonic::codegen::*;

    use crate::events::{Event, SignedEvent};

    /// Client for the peer event service.
    #[derive(Debug, Clone)]
    pub struct EventsClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl<T> EventsClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            Self { inner: tonic::client::Grpc::new(inner) }
        }

        pub async fn chat(
            &mut self,
            request: impl tonic::IntoStreamingRequest<Message = SignedEvent>,
        ) -> Result<tonic::Response<tonic::codec::Streaming<Event>>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = PathAndQuery::from_static("/protos.Events/Chat");
            self.inner
                .streaming(request.into_streaming_request(), path, codec)
                .await
        }
    }
}

pub mod discovery_client {
    use tonic::codegen::http::uri::PathAndQuery;
    use tonic::codegen::*;

    use crate::discovery::{DiscoveryRequest, DiscoveryResponse};

    /// Client for the peer service-discovery endpoint.
    #[derive(Debug, Clone)]
    pub struct DiscoveryClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl<T> DiscoveryClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            Self { inner: tonic::client::Grpc::new(inner) }
        }

        pub async fn discover(
            &mut self,
            request: impl tonic::IntoRequest<DiscoveryRequest>,
        ) -> Result<tonic::Response<DiscoveryResponse>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = PathAndQuery::from_static("/discovery.Discovery/Discover");
            self.inner.unary(request.into_request(), path, codec).await
        }
    }
}

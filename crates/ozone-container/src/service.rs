//! gRPC server for the container data plane.

use crate::dispatcher::Dispatcher;
use ozone_proto::container::{
    xceiver_client_protocol_service_server::XceiverClientProtocolService,
    ContainerCommandRequestProto, ContainerCommandResponseProto,
};
use std::sync::Arc;
use tonic::{Request, Response, Status};

pub struct XceiverService {
    dispatcher: Arc<Dispatcher>,
}

impl XceiverService {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[tonic::async_trait]
impl XceiverClientProtocolService for XceiverService {
    async fn send(
        &self,
        request: Request<ContainerCommandRequestProto>,
    ) -> Result<Response<ContainerCommandResponseProto>, Status> {
        Ok(Response::new(self.dispatcher.dispatch(request.into_inner())))
    }
}

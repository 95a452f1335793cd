//! Lodestar Client — runtime support for generated HTTP API clients.
//!
//! Generated code supplies one [`ApiRequest`] implementation and one
//! [`ResponseValue`] enum per API operation; this crate supplies everything
//! else: request building, the [`Behavior`] pipeline, dispatch with
//! cancellation, response classification, and JSON decoding.

pub mod behavior;
pub mod builder;
pub mod client;
pub mod codec;
pub mod dispatch;
pub mod error;
pub mod request;
pub mod transport;

pub use behavior::{Behavior, BehaviorGroup, ResponseView};
pub use builder::{MultipartPart, PartData, RequestBody, TransportRequest};
pub use client::{CancelHandle, Client, ClientConfig, RequestHandle};
pub use codec::JsonCodec;
pub use dispatch::{ApiResponse, DispatchMetrics};
pub use error::{ApiError, DecodeError, RequestError, ResponseError};
pub use request::{
    ApiRequest, FileSource, ParamValue, ResponseValue, ServiceDescriptor, UploadFile,
};
pub use transport::{ReqwestTransport, Transport, TransportFault, TransportReply};

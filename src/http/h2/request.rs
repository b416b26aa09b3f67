//! Request consumers
//!
//! Every stream the peer opens gets a [`RequestConsumer`] from the
//! connection's [`RequestFactory`]. The consumer is told the request headers
//! as they are converted, fed the body, and finally told the request is
//! complete. [`BufferedRequest`] is the ready-made consumer: it collects the
//! whole request and answers it with a [`Handler`].

use super::error::Error;
use super::stream::StreamIo;
use super::StreamId;
use crate::http::{Headers, HttpRequest, HttpResponse, Method, Status};
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use tracing::{debug, warn};

/// Receiver of one request
pub trait RequestConsumer {
    /// A regular request header; repeated names arrive once per value
    fn add_header(&mut self, name: &str, value: &str);

    /// Body length if known; `Some(0)` for bodiless requests
    fn got_length(&mut self, length: Option<u64>);

    /// A piece of the request body
    fn handle_content_chunk(&mut self, io: &mut StreamIo<'_>, data: Bytes);

    /// The request is complete; `version` is always `"HTTP/2"`
    fn request_received(&mut self, io: &mut StreamIo<'_>, method: &str, path: &str, version: &str);

    /// The stream was reset or the connection went away
    fn connection_lost(&mut self, reason: &Error);
}

/// Builds a consumer for each new stream
pub trait RequestFactory {
    fn build(&mut self, stream_id: StreamId, queued: bool) -> Box<dyn RequestConsumer>;
}

impl<F> RequestFactory for F
where
    F: FnMut(StreamId, bool) -> Box<dyn RequestConsumer>,
{
    fn build(&mut self, stream_id: StreamId, queued: bool) -> Box<dyn RequestConsumer> {
        self(stream_id, queued)
    }
}

/// Turns a complete request into a response
pub trait Handler {
    fn handle(&self, request: &HttpRequest) -> HttpResponse;
}

impl<F> Handler for F
where
    F: Fn(&HttpRequest) -> HttpResponse,
{
    fn handle(&self, request: &HttpRequest) -> HttpResponse {
        self(request)
    }
}

/// Consumer that buffers the request and answers it with a [`Handler`]
pub struct BufferedRequest<H: ?Sized> {
    handler: Arc<H>,
    headers: Headers,
    body: BytesMut,
    length: Option<u64>,
    lost: bool,
}

impl<H: Handler + ?Sized> BufferedRequest<H> {
    pub fn new(handler: Arc<H>) -> Self {
        BufferedRequest {
            handler,
            headers: Headers::new(),
            body: BytesMut::new(),
            length: None,
            lost: false,
        }
    }

    /// Declared body length, if any
    pub fn length(&self) -> Option<u64> {
        self.length
    }

    fn respond(&self, io: &mut StreamIo<'_>, method: Method, response: HttpResponse) {
        let (status, headers, body) = response.into_parts();
        let mut fields = headers.to_field_list();
        if !headers.contains("content-length") {
            fields.push(("content-length".to_string(), body.len().to_string()));
        }

        if let Err(err) = io.write_headers(status.code(), &fields) {
            warn!(stream_id = io.stream_id(), %err, "failed to send response headers");
            io.abort_connection();
            return;
        }
        if !body.is_empty() && !method.is_bodiless() && !status.forbids_body() {
            io.write(body);
        }
        io.finish();
    }
}

impl<H: Handler + ?Sized> RequestConsumer for BufferedRequest<H> {
    fn add_header(&mut self, name: &str, value: &str) {
        self.headers.insert(name, value);
    }

    fn got_length(&mut self, length: Option<u64>) {
        self.length = length;
    }

    fn handle_content_chunk(&mut self, _io: &mut StreamIo<'_>, data: Bytes) {
        self.body.extend_from_slice(&data);
    }

    fn request_received(&mut self, io: &mut StreamIo<'_>, method: &str, path: &str, _version: &str) {
        if self.lost {
            return;
        }

        let method = match Method::from_str(method) {
            Ok(method) => method,
            Err(_) => {
                debug!(stream_id = io.stream_id(), method, "unsupported method");
                let response = HttpResponse::new(Status::NOT_IMPLEMENTED);
                self.respond(io, Method::Get, response);
                return;
            }
        };

        let mut request = HttpRequest::new(method, path);
        *request.headers_mut() = std::mem::take(&mut self.headers);
        request.set_body(self.body.split().to_vec());

        debug!(stream_id = io.stream_id(), %method, path, body = request.body().len(), "request complete");
        let response = self.handler.handle(&request);
        self.respond(io, method, response);
    }

    fn connection_lost(&mut self, reason: &Error) {
        debug!(%reason, "request lost");
        self.lost = true;
    }
}

/// Factory that answers every stream with a [`BufferedRequest`] around `handler`
pub fn handler_factory<H>(handler: Arc<H>) -> impl RequestFactory
where
    H: Handler + ?Sized + 'static,
{
    move |_stream_id: StreamId, _queued: bool| -> Box<dyn RequestConsumer> {
        Box::new(BufferedRequest::new(Arc::clone(&handler)))
    }
}

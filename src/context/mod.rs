//! Per-request context handed to middleware and route handlers.

use crate::Request;

/// A request on its way through the middleware pipeline and router.
#[derive(Debug)]
pub struct Context {
    request: Request,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self { request }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn into_request(self) -> Request {
        self.request
    }
}

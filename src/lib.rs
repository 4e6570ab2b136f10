//! Body Modification Wasm Filter for Envoy Proxy
//!
//! This filter reads a JSON instruction list from the `x-body-modification`
//! request header, strips the header, buffers the targeted message body and
//! replaces it with the edited result at end of stream. Malformed
//! instructions never block traffic: the body passes through unmodified.
//!
//! Targets: wasm32-wasi (Envoy proxy-wasm ABI)

pub mod config;
pub mod modification;
pub mod stream;
pub mod telemetry;

use log::{info, warn};
use proxy_wasm::hostcalls;
use proxy_wasm::traits::{Context, HttpContext, RootContext};
use proxy_wasm::types::{Action, BufferType, ContextType, LogLevel, MapType};

use crate::config::{BodyTarget, FilterConfig};
use crate::stream::{HostError, MessageHost, StreamContext};

/// Root context for filter lifecycle management
struct ModifyBodyRootContext {
    config: FilterConfig,
}

impl ModifyBodyRootContext {
    fn new() -> Self {
        Self {
            config: FilterConfig::default(),
        }
    }
}

impl Context for ModifyBodyRootContext {}

impl RootContext for ModifyBodyRootContext {
    fn on_configure(&mut self, _plugin_configuration_size: usize) -> bool {
        if let Some(config_bytes) = self.get_plugin_configuration() {
            match FilterConfig::from_bytes(&config_bytes) {
                Ok(config) => self.config = config,
                // Keep defaults rather than refusing to start
                Err(e) => warn!("Ignoring invalid filter configuration: {}", e),
            }
        }

        info!(
            "Body modification filter initialized: header={}, target={}, max_body_size={}",
            self.config.control_header,
            self.config.target.as_str(),
            self.config.max_body_size
        );

        true
    }

    fn create_http_context(&self, context_id: u32) -> Option<Box<dyn HttpContext>> {
        Some(Box::new(ModifyBodyHttpContext::new(
            context_id,
            self.config.clone(),
        )))
    }

    fn get_type(&self) -> Option<ContextType> {
        Some(ContextType::HttpContext)
    }
}

/// Host calls for the HTTP context currently being dispatched
struct WasmHost;

fn header_map(message: BodyTarget) -> MapType {
    match message {
        BodyTarget::Request => MapType::HttpRequestHeaders,
        BodyTarget::Response => MapType::HttpResponseHeaders,
    }
}

fn body_buffer(message: BodyTarget) -> BufferType {
    match message {
        BodyTarget::Request => BufferType::HttpRequestBody,
        BodyTarget::Response => BufferType::HttpResponseBody,
    }
}

impl MessageHost for WasmHost {
    fn get_header(&self, message: BodyTarget, name: &str) -> Option<String> {
        match hostcalls::get_map_value(header_map(message), name) {
            Ok(value) => value,
            Err(status) => {
                warn!("get_map_value({}) failed: {:?}", name, status);
                None
            }
        }
    }

    fn remove_header(&mut self, message: BodyTarget, name: &str) -> Result<(), HostError> {
        hostcalls::set_map_value(header_map(message), name, None)
            .map_err(|status| HostError(format!("{:?}", status)))
    }

    fn get_body_bytes(&self, message: BodyTarget, offset: usize, length: usize) -> Option<Vec<u8>> {
        match hostcalls::get_buffer(body_buffer(message), offset, length) {
            Ok(bytes) => bytes,
            Err(status) => {
                warn!("get_buffer({}, {}) failed: {:?}", offset, length, status);
                None
            }
        }
    }

    fn replace_body_bytes(
        &mut self,
        message: BodyTarget,
        buffered_len: usize,
        body: &[u8],
    ) -> Result<(), HostError> {
        hostcalls::set_buffer(body_buffer(message), 0, buffered_len, body)
            .map_err(|status| HostError(format!("{:?}", status)))
    }
}

/// HTTP context for per-request processing
struct ModifyBodyHttpContext {
    stream: StreamContext,
    host: WasmHost,
}

impl ModifyBodyHttpContext {
    fn new(context_id: u32, config: FilterConfig) -> Self {
        Self {
            stream: StreamContext::new(context_id, config),
            host: WasmHost,
        }
    }
}

impl Context for ModifyBodyHttpContext {}

impl HttpContext for ModifyBodyHttpContext {
    fn on_http_request_headers(&mut self, _num_headers: usize, end_of_stream: bool) -> Action {
        self.stream.on_request_headers(&mut self.host, end_of_stream)
    }

    fn on_http_request_body(&mut self, body_size: usize, end_of_stream: bool) -> Action {
        self.stream
            .on_body(&mut self.host, BodyTarget::Request, body_size, end_of_stream)
    }

    fn on_http_response_headers(&mut self, _num_headers: usize, end_of_stream: bool) -> Action {
        self.stream.on_response_headers(&mut self.host, end_of_stream)
    }

    fn on_http_response_body(&mut self, body_size: usize, end_of_stream: bool) -> Action {
        self.stream
            .on_body(&mut self.host, BodyTarget::Response, body_size, end_of_stream)
    }

    fn on_log(&mut self) {
        self.stream.on_done();
    }
}

// Register the filter with proxy-wasm runtime
proxy_wasm::main! {{
    proxy_wasm::set_log_level(LogLevel::Info);
    proxy_wasm::set_root_context(|_| -> Box<dyn RootContext> {
        Box::new(ModifyBodyRootContext::new())
    });
}}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_and_buffer_mapping() {
        assert!(matches!(header_map(BodyTarget::Request), MapType::HttpRequestHeaders));
        assert!(matches!(header_map(BodyTarget::Response), MapType::HttpResponseHeaders));
        assert!(matches!(body_buffer(BodyTarget::Request), BufferType::HttpRequestBody));
        assert!(matches!(body_buffer(BodyTarget::Response), BufferType::HttpResponseBody));
    }

    #[test]
    fn test_http_context_uses_root_config() {
        let mut root = ModifyBodyRootContext::new();
        root.config.max_body_size = 16;
        let ctx = ModifyBodyHttpContext::new(9, root.config.clone());
        assert!(!ctx.stream.is_active());
        assert_eq!(ctx.stream.summary().operations, 0);
    }
}

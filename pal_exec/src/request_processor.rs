//! # Control request processor
//!
//! The request processor handles control requests coming from the control server.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, warn};

// Internal
use crate::engine::EngineHandle;
use comms_if::tc::{ControlRequest, ControlResponse};

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Execute a control request.
///
/// Every request produces a response, failures are reported as `Rejected` with the reason.
pub fn exec(engine: &EngineHandle, request: &ControlRequest) -> ControlResponse {
    let result = match request {
        ControlRequest::Directive(text) => {
            debug!("Received directive {:?}", text);
            engine.directive_str(text).map(|_| ControlResponse::Ok)
        }
        ControlRequest::LoadScript(text) => {
            debug!("Received script of {} bytes", text.len());
            engine.load_script(text).map(|_| ControlResponse::Ok)
        }
        ControlRequest::GetStatus => engine.status().map(ControlResponse::Status),
        ControlRequest::GetScript => engine.script_text().map(ControlResponse::Script),
    };

    match result {
        Ok(r) => r,
        Err(e) => {
            warn!("Request rejected: {}", e);
            ControlResponse::Rejected(e.to_string())
        }
    }
}

pub mod js_executor;
pub mod session;

pub use js_executor::{js_string, JsExecutor};
pub use session::{
    BrowserSession, ErrorArtifact, ExistingForm, FormDetection, FormTarget, SessionFactory,
};

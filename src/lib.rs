//! Front end for an agriculture advice service: formats the service's
//! markdown-flavoured answers into HTML fragments and reveals them
//! progressively into page regions.

pub mod client;
pub mod config;
pub mod error;
pub mod format;
pub mod handlers;
pub mod page;
pub mod reveal;
pub mod weather;
#[cfg(feature = "web")]
pub mod web;

#[cfg(test)]
mod testing;

pub use client::{
    AdviceRequest, AdviceResponse, Backend, Endpoint, HttpBackend, ImageUpload, WeatherReport,
    interpret,
};
pub use config::AdvisorConfig;
pub use error::ClientError;
pub use format::{Fragment, FragmentKind, format_response, render_html};
pub use handlers::{HandlerOutcome, Handlers};
pub use page::{Page, RegionHandle};
pub use reveal::{
    RenderGuard, RenderToken, RetryPolicy, RevealConfig, RevealFrame, RevealOutcome, RevealState,
    RevealStep, RevealTarget, Revealer, final_html,
};
pub use weather::WeatherCards;

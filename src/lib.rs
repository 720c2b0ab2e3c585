//! Request Mock Engine
//!
//! An in-process mock server for an API client. When a mock is active,
//! outgoing requests that match its method and path are answered with a
//! synthesized response instead of going to the network.
//!
//! # Features
//!
//! - **Path Patterns**: `:param` segments, `*` wildcards, trailing `/*` and `/**`
//! - **Conditional Rules**: Match on query, header, body or path with
//!   equals/contains/startsWith/endsWith/regex/exists, first match wins
//! - **Dynamic Templates**: `{{query.x}}`, `{{path.id}}`, `{{body.user.name}}`,
//!   `{{random.number(1,10)}}`, `{{date.format(YYYY-MM-DD)}}` and more
//! - **Latency Simulation**: Per-mock and per-rule delays
//! - **Request Log**: Bounded newest-first log of every mocked request
//!
//! # Example Configuration
//!
//! ```yaml
//! mocks:
//!   - id: user-by-id
//!     name: User by id
//!     path: /api/users/:id
//!     method: GET
//!     statusCode: 200
//!     headers:
//!       - key: Content-Type
//!         value: application/json
//!     dynamicResponse: true
//!     responseTemplate: '{"id": "{{path.id}}"}'
//! active: user-by-id
//! ```

pub mod config;
pub mod error;
pub mod log;
pub mod matcher;
pub mod request;
pub mod server;
pub mod template;

pub use config::{MockConfiguration, MockRule, MockServerConfig};
pub use error::{MockError, TemplateError};
pub use matcher::PathPattern;
pub use request::OutgoingRequest;
pub use server::{MockResponse, MockServer, RequestInterceptor};
pub use template::TemplateEngine;

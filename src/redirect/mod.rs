pub mod handlers;
pub mod resolver;
pub mod routes;

pub use handlers::RedirectState;
pub use resolver::{Redirector, ResolveError};
pub use routes::create_redirect_router;

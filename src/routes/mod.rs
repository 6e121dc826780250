/// Router Module Index
///
/// Routes are split by who may reach them. Authentication is applied as a layer on the
/// authenticated and admin routers; role checks happen inside the handlers, since most
/// of them depend on the content node being touched.

/// Routes reachable without a session.
pub mod public;

/// Routes for any signed-in user. What they return is filtered by role.
pub mod authenticated;

/// Content and user management. Each handler checks the capability it needs.
pub mod admin;

// Durable session store for Trellis
//
// Postgres implementation of the core SessionStore contract. Schema and
// indexes live in ./migrations; `PgSessionStore::connect` applies them.

pub mod models;
pub mod session_store;

pub use session_store::PgSessionStore;

pub mod feed_socket;
pub mod health;
pub mod latency;
pub mod routes;

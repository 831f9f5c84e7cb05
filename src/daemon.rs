pub mod broadcast;
pub mod connections;
pub mod coordinator;
pub mod outliers;
pub mod pipeline;
pub mod runs;

// Transport surface: WebSocket ingest + HTTP/SSE observers
pub mod server;

// handlers/protected/mod.rs - Protected handlers (JWT authentication required)
//
// Route Prefix: /api/*
// Middleware: jwt_auth_middleware injects AuthUser; every handler builds a
// Caller from it and passes it explicitly into the broker.

pub mod auth;
pub mod elevation;

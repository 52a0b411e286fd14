// handlers/mod.rs - Two security tiers
//
// Public (no auth): service info and health
// Protected (JWT auth): elevation lifecycle, state snapshots, audit, session hooks
pub mod protected;
pub mod public;

//! # stockline-db: Database Layer for Stockline
//!
//! This crate provides durable storage for the stock engine. It uses SQLite
//! with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stockline Data Flow                              │
//! │                                                                         │
//! │  ReservationManager::reserve                                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  stockline-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐   ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │   │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                │   │  (embedded)  │  │   │
//! │  │   │               │    │ StockLedger    │   │ 001_stock_   │  │   │
//! │  │   │ SqlitePool    │◄───│ Reservation    │   │   ledger.sql │  │   │
//! │  │   │ WAL + busy    │    │   Repository   │   │              │  │   │
//! │  │   │   timeout     │    │ MoveLog        │   │              │  │   │
//! │  │   └───────────────┘    └────────────────┘   └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   stock_levels • reservations • stock_moves (append-only)       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Stock ledger, reservations, move log
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stockline_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("stock.db")).await?;
//!
//! let mut tx = db.begin().await?;
//! let level = db.stock().apply_delta_in(&mut tx, &key, StockDelta::reserve(2), now).await?;
//! db.moves().append_in(&mut tx, &stock_move).await?;
//! tx.commit().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::moves::MoveLog;
pub use repository::reservation::ReservationRepository;
pub use repository::stock::StockLedger;

// Engine code composes transactions from these without naming sqlx itself.
pub use sqlx::{Sqlite, SqliteConnection, Transaction};

//! Shared fixtures: a fake source of truth that counts executions.

#![allow(dead_code)]

use async_trait::async_trait;
use query_cache::{ModelInfo, Source, Statement, UpstreamError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub total: u64,
}

pub fn user(id: u64, name: &str) -> User {
    User {
        id,
        name: name.to_string(),
    }
}

pub fn users_model() -> ModelInfo {
    ModelInfo::of::<User>("users")
}

pub fn orders_model() -> ModelInfo {
    ModelInfo::of::<Order>("orders")
}

pub fn select_users() -> Statement<Vec<User>> {
    Statement::query("SELECT * FROM users", Vec::new()).with_model(users_model())
}

pub fn select_user(id: u64) -> Statement<Option<User>> {
    Statement::query("SELECT * FROM users WHERE id = ? LIMIT 1", None)
        .bind(id)
        .with_model(users_model())
}

pub fn select_orders() -> Statement<Vec<Order>> {
    Statement::query("SELECT * FROM orders", Vec::new()).with_model(orders_model())
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// In-memory table standing in for a database.
pub struct FakeTable<R> {
    rows: Mutex<Vec<R>>,
    executions: AtomicUsize,
    fail_next: AtomicBool,
}

impl<R: Clone + Send + Sync> FakeTable<R> {
    pub fn new(rows: Vec<R>) -> Self {
        Self {
            rows: Mutex::new(rows),
            executions: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Number of times the table actually ran a read.
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn writer(&self) -> Writer<'_, R> {
        Writer(self)
    }

    fn rows(&self) -> Vec<R> {
        self.rows.lock().unwrap().clone()
    }

    fn begin(&self) -> Result<(), UpstreamError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err("connection reset by peer".into());
        }
        Ok(())
    }
}

#[async_trait]
impl<R: Clone + Send + Sync> Source<Vec<R>> for FakeTable<R> {
    async fn execute(&self, stmt: &mut Statement<Vec<R>>) -> Result<(), UpstreamError> {
        self.begin()?;
        stmt.dest = self.rows();
        stmt.rows_affected = stmt.dest.len() as u64;
        Ok(())
    }
}

#[async_trait]
impl<R: Clone + Send + Sync> Source<Option<R>> for FakeTable<R> {
    async fn execute(&self, stmt: &mut Statement<Option<R>>) -> Result<(), UpstreamError> {
        self.begin()?;
        stmt.dest = self.rows().into_iter().next();
        stmt.rows_affected = stmt.dest.is_some() as u64;
        Ok(())
    }
}

/// Mutation side of a [`FakeTable`]: appends the statement's rows.
pub struct Writer<'a, R>(&'a FakeTable<R>);

#[async_trait]
impl<'a, R: Clone + Send + Sync> Source<Vec<R>> for Writer<'a, R> {
    async fn execute(&self, stmt: &mut Statement<Vec<R>>) -> Result<(), UpstreamError> {
        if self.0.fail_next.swap(false, Ordering::SeqCst) {
            return Err("constraint violation".into());
        }
        self.0.rows.lock().unwrap().extend(stmt.dest.iter().cloned());
        stmt.rows_affected = stmt.dest.len() as u64;
        Ok(())
    }
}

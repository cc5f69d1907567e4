//! Shared helpers for engine integration tests
#![allow(dead_code)]

use std::sync::Arc;
use weft_stm::{Branch, CommitStatus, TCell, Transaction, Value};

/// Read a cell inside a throwaway transaction
pub fn read_cell(branch: &Arc<Branch>, cell: &TCell) -> Option<Value> {
    let mut txn = branch.begin();
    let value = cell.get(&mut txn).unwrap();
    txn.abort();
    value
}

/// Write a cell and commit, returning the commit status
pub fn write_cell(branch: &Arc<Branch>, cell: &TCell, value: i64) -> CommitStatus {
    let mut txn = branch.begin();
    cell.set(&mut txn, Value::integer(value)).unwrap();
    txn.commit().status
}

/// Write a cell inside an existing transaction
pub fn set(txn: &mut Transaction, cell: &TCell, value: i64) {
    cell.set(txn, Value::integer(value)).unwrap();
}

/// Read a cell inside an existing transaction
pub fn get(txn: &mut Transaction, cell: &TCell) -> Option<Value> {
    cell.get(txn).unwrap()
}

use super::*;
use crate::clock::SimulatedTimeProvider;
use crate::document::MIN_RECEIVE_TIME;
use crate::storage::MemoryStore;

mod common;
use common::*;

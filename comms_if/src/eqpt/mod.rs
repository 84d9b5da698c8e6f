//! # Equipment Interface
//!
//! This module defines the structures polled from, or reported by, the low level drivers.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod drive;
pub mod sensors;

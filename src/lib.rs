//! AssistIQ — automated L1 triage and resolution agent for ERP support
//! tickets.
//!
//! Tickets arrive via webhook or the polling loop, are validated against a
//! module/field knowledge base, and validated tickets get candidate
//! resolutions drafted from a retrieval corpus of historically solved
//! tickets, optionally augmented with external web results. Humans approve
//! drafts before anything is posted back to the ticket platform.

pub mod api;
pub mod config;
pub mod services;
pub mod workflows;

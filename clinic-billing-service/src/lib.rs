//! Clinic Billing Service - visit ledgers, payment allocation, and doctor commissions.

pub mod config;
pub mod dtos;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;

// API module - read-only status endpoints

pub mod rest;

use ipnet::Ipv4Net;
use serde::Serialize;

use crate::routes::KernelRoute;

/// Managed kernel routes as seen right now
#[derive(Debug, Serialize)]
pub struct RouteStatus {
    pub hostname: String,
    pub timestamp: String,
    pub pools: Vec<Ipv4Net>,
    pub routes: Vec<KernelRoute>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

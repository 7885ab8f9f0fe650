#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod auth;
pub mod error;
pub mod gateway;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Environment variable read by [`auth::Credentials::from_env`]
pub const TOKEN_VAR: &str = "RAWCORD_TOKEN";

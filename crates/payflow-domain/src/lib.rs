//! Domain types shared by the Payflow services.
//!
//! This crate contains only pure types with no framework dependencies.
//! Import in `usecase/` and `domain/` layers; persistence mapping lives in `infra/`.

pub mod event;
pub mod id;
pub mod money;
pub mod status;

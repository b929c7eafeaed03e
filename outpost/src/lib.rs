//! The outpost relay process: configuration discovery, the controller that
//! owns the listener, and the DNS record helpers behind `outpost records` and
//! `outpost check-dns`.

pub mod controller;
pub mod discovery;
pub mod records;

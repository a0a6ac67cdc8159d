mod cancel;
mod core;
mod entrypoint;
mod extended;
mod protocol;
mod startup;

pub(crate) use entrypoint::{client_entrypoint, client_entrypoint_too_many_clients_already};

#[cfg(test)]
mod tests;

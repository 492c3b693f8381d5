//! Library side of the `nodewire` binary: the clap surface in [`cli`] and
//! the wiring of node, cache and stream clients in [`bootstrap`].

pub mod bootstrap;
pub mod cli;

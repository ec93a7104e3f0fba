mod common;
mod correlator;
mod inbound;

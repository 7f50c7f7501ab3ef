pub mod chi;

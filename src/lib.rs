pub mod application;
pub mod domain;
pub mod interfaces;
pub mod observer;
pub mod protocol;
pub mod rpc;
pub mod security;
pub mod storage;

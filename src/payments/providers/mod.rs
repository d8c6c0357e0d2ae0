pub mod mpesa;

pub use mpesa::DarajaClient;

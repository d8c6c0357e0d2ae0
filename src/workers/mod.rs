pub mod status_poller;

pub mod callback_client;
pub mod pcm_device;
pub mod transfer_delegate;

pub mod killswitch;

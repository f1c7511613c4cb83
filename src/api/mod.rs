pub mod carpet;

pub mod command_controller;

pub mod fake_sumo;

pub mod regional;

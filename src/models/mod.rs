pub mod cfl;
pub mod conv;
pub mod decoder;
pub mod efficientnet;
pub mod mbconv;
pub mod params;
pub mod registry;

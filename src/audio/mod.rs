pub mod analyser;
pub mod analysis;
pub mod beat;
pub mod characteristics;
pub mod clock;
pub mod decode;
pub mod features;
pub mod history;
pub mod spectrum;

/*!
 * Protocol implementations for LabFlow.
 *
 * This module contains the codec for each supported instrument family.
 */

pub mod densitometer;
pub mod pump;

pub use densitometer::DensitometerProtocol;
pub use pump::PumpProtocol;

/*!
 * Device implementations for LabFlow.
 *
 * This module contains one driver per supported instrument family.
 */

pub mod densitometer;
pub mod pump;

pub use densitometer::DensitometerDriver;
pub use pump::PumpDriver;

/*
 * Kernel Components
 *
 * Higher-level building blocks assembled from the driver and utility
 * layers below them.
 */

pub mod tty;

//! Behavioural scenarios for container creation and destruction.

mod lifecycle;

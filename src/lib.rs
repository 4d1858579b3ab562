#[allow(non_snake_case)]
pub mod Equilibrium;
#[allow(non_snake_case)]
pub mod Models;
#[allow(non_snake_case)]
pub mod Utils;

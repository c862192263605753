// ==============================================================================
// lib.rs - Submission Processor Library
// ==============================================================================
// Description: Library interface for the submission file transformations
// Author: Matt Barham
// Created: 2026-10-05
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================

pub mod alignment;
pub mod archive;
pub mod audit;
pub mod metadata;
pub mod models;
pub mod scratch;
pub mod validator;
pub mod variant;

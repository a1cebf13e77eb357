// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use flexi_logger::Logger;
use std::sync::Once;

//==============================================================================
// Constants & Structures
//==============================================================================

static INIT_LOG: Once = Once::new();

//==============================================================================
// Standalone Functions
//==============================================================================

/// Installs the default log sink. Embedders with their own `log`
/// implementation skip this; tests call it from every entry point, so it is
/// idempotent.
pub fn initialize() {
    INIT_LOG.call_once(|| {
        Logger::with_env_or_str("info")
            .start()
            .expect("failed to initialize logger");
    });
}

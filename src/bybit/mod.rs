//! Bybit v5 adapter: signed REST client and the private execution stream.

mod msg;
mod private_stream;
mod rest;

pub use private_stream::PrivateStream;
pub use rest::BybitClient;

/// REST base + private stream endpoints. Demo trading runs on live market
/// data with paper fills and has its own host pair.
#[derive(Clone, Copy, Debug)]
pub struct Endpoints {
    pub rest: &'static str,
    pub private_ws: &'static str,
}

pub const MAINNET: Endpoints = Endpoints {
    rest: "https://api.bybit.com",
    private_ws: "wss://stream.bybit.com/v5/private",
};

pub const TESTNET: Endpoints = Endpoints {
    rest: "https://api-testnet.bybit.com",
    private_ws: "wss://stream-testnet.bybit.com/v5/private",
};

pub const DEMO: Endpoints = Endpoints {
    rest: "https://api-demo.bybit.com",
    private_ws: "wss://stream-demo.bybit.com/v5/private",
};

impl Endpoints {
    pub fn select(testnet: bool, demo: bool) -> Endpoints {
        if demo {
            DEMO
        } else if testnet {
            TESTNET
        } else {
            MAINNET
        }
    }
}

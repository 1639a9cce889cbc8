use crate::configuration::types::Protocol;
use crate::data_capture::http_request::{HttpRequest, ParsedRequest};
use crate::response_simulation::templates;
use crate::storage::types::Outcome;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

const LOGIN_ROUTES: &[&str] = &["/login", "/login.php", "/login.html", "/wp-login.php"];

/// What the client sent, as far as reply selection is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestCategory {
    /// A well-formed request for the login page.
    Login,
    /// Any other well-formed request.
    Page,
    /// Bytes that did not parse as a request.
    Malformed,
}

impl RequestCategory {
    pub fn of(request: Option<&HttpRequest>) -> Self {
        match request {
            Some(HttpRequest::Parsed(req)) if is_login_route(req) => RequestCategory::Login,
            Some(HttpRequest::Parsed(_)) => RequestCategory::Page,
            _ => RequestCategory::Malformed,
        }
    }
}

fn is_login_route(req: &ParsedRequest) -> bool {
    let route = req.route().trim_end_matches('/').to_ascii_lowercase();
    LOGIN_ROUTES.contains(&route.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Banner,
    Redirect,
    Page,
    LoginPage,
    BadRequest,
}

impl Variant {
    pub fn outcome(self) -> Outcome {
        match self {
            Variant::Banner => Outcome::SentBanner,
            Variant::Redirect => Outcome::Redirected,
            Variant::Page | Variant::LoginPage => Outcome::Sent200,
            Variant::BadRequest => Outcome::Sent400,
        }
    }
}

/// Picks the reply variant. `draw` is a uniform sample from `[0, 1)`.
pub fn select_variant(
    protocol: Protocol,
    category: RequestCategory,
    draw: f64,
    redirect_prob: f64,
) -> Variant {
    if protocol == Protocol::SSH {
        return Variant::Banner;
    }
    match category {
        RequestCategory::Malformed => Variant::BadRequest,
        RequestCategory::Login => Variant::LoginPage,
        RequestCategory::Page if draw < redirect_prob => Variant::Redirect,
        RequestCategory::Page => Variant::Page,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedResponse {
    pub reply: Option<Vec<u8>>,
    pub notes: Outcome,
}

/// Chooses and renders replies. One instance is shared by every session of the process.
#[derive(Debug)]
pub struct ResponseSimulator {
    redirect_prob: f64,
    rng: Mutex<SmallRng>,
}

impl ResponseSimulator {
    pub fn new(redirect_prob: f64) -> Self {
        Self::with_rng(redirect_prob, SmallRng::from_entropy())
    }

    /// Simulator with a fixed seed, producing a reproducible sequence of choices.
    pub fn with_seed(redirect_prob: f64, seed: u64) -> Self {
        Self::with_rng(redirect_prob, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(redirect_prob: f64, rng: SmallRng) -> Self {
        Self {
            redirect_prob: redirect_prob.clamp(0.0, 1.0),
            rng: Mutex::new(rng),
        }
    }

    pub fn redirect_prob(&self) -> f64 {
        self.redirect_prob
    }

    fn draw(&self) -> f64 {
        self.rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .gen::<f64>()
    }

    /// Reply for one exchange. For SSH the request is ignored; for HTTP a missing request is
    /// treated as malformed input.
    pub fn respond(&self, protocol: Protocol, request: Option<&HttpRequest>) -> SimulatedResponse {
        let category = RequestCategory::of(request);
        let draw = match (protocol, category) {
            (Protocol::SSH, _)
            | (_, RequestCategory::Malformed)
            | (_, RequestCategory::Login) => 0.0,
            _ => self.draw(),
        };
        let variant = select_variant(protocol, category, draw, self.redirect_prob);

        let reply = match variant {
            Variant::Banner => templates::SSH_BANNER.to_vec(),
            Variant::Redirect => templates::redirect_to_login(),
            Variant::Page => templates::welcome_page(),
            Variant::BadRequest => templates::bad_request(),
            Variant::LoginPage => {
                let action = match request {
                    Some(HttpRequest::Parsed(req)) => req.path.as_str(),
                    _ => "/login",
                };
                templates::login_page(action)
            }
        };

        SimulatedResponse {
            reply: Some(reply),
            notes: variant.outcome(),
        }
    }
}

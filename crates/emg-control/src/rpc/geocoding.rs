use rspc::{Procedure, Router};
use specta::Type;

use super::{ApiError, Ctx, api_error_with_fields, require_user};
use crate::geocoding::ParsedAddress;

#[derive(Debug, Clone, serde::Deserialize, Type)]
pub struct SearchInput {
    pub query: String,
}

#[derive(Debug, Clone, serde::Deserialize, Type)]
pub struct ReverseInput {
    pub lat: f64,
    pub lng: f64,
}

fn coordinates_are_valid(lat: f64, lng: f64) -> bool {
    lat.is_finite() && lng.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng)
}

pub(super) fn router() -> Router<Ctx> {
    Router::new()
        .procedure(
            "search",
            Procedure::builder::<ApiError>().query(|ctx: Ctx, input: SearchInput| async move {
                require_user(&ctx)?;
                // Lookup failures degrade to an empty list; the form stays usable.
                let found: Vec<ParsedAddress> = ctx.geocoding.search(&input.query).await;
                Ok(found)
            }),
        )
        .procedure(
            "reverse",
            Procedure::builder::<ApiError>().query(|ctx: Ctx, input: ReverseInput| async move {
                require_user(&ctx)?;
                if !coordinates_are_valid(input.lat, input.lng) {
                    return Err(api_error_with_fields(
                        &ctx,
                        "invalid_param",
                        "Ungültige Koordinaten",
                        [("lat".to_string(), "Ungültige Koordinaten".to_string())].into(),
                    ));
                }
                Ok(ctx.geocoding.reverse(input.lat, input.lng).await)
            }),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_outside_the_globe_are_rejected() {
        assert!(coordinates_are_valid(47.37, 8.54));
        assert!(!coordinates_are_valid(91.0, 8.54));
        assert!(!coordinates_are_valid(47.0, f64::NAN));
    }
}

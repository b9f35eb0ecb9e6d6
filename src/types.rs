// Domain model for tour price search
// Wire shapes follow the backend JSON (camelCase keys, string-keyed maps)

use std::{cmp::Ordering, collections::HashMap, fmt};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// Opaque identifier of one backend search job / polling session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchToken(String);

impl SearchToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SearchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SearchToken {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceOffer {
    pub id: String,
    pub amount: f64,
    pub currency: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(rename = "hotelID", default, skip_serializing_if = "Option::is_none")]
    pub hotel_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hotel {
    pub id: u64,
    pub name: String,
    pub img: String,
    pub city_id: u64,
    pub city_name: String,
    pub country_id: String,
    pub country_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Country {
    pub id: String,
    pub name: String,
    pub flag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct City {
    pub id: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_id: Option<String>,
}

// Anything the destination picker can return
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GeoEntity {
    Country(Country),
    City(City),
    Hotel(Hotel),
}

impl GeoEntity {
    /// The destination id a price search should be started for.
    ///
    /// Searches are country-scoped, so cities and hotels resolve to their
    /// country. A city without a known country cannot be searched.
    pub fn destination_id(&self) -> Option<&str> {
        match self {
            GeoEntity::Country(country) => Some(&country.id),
            GeoEntity::Hotel(hotel) => Some(&hotel.country_id),
            GeoEntity::City(city) => city.country_id.as_deref(),
        }
    }
}

pub type PricesMap = HashMap<String, PriceOffer>;
pub type HotelsMap = HashMap<String, Hotel>;
pub type CountriesMap = HashMap<String, Country>;
pub type GeoResponse = HashMap<String, GeoEntity>;

fn by_price(a: &PriceOffer, b: &PriceOffer) -> Ordering {
    a.amount
        .total_cmp(&b.amount)
        .then_with(|| a.id.cmp(&b.id))
}

// Flatten a backend prices map into a cheapest-first sequence
pub fn sorted_by_price(prices: PricesMap) -> Vec<PriceOffer> {
    let mut offers: Vec<PriceOffer> = prices.into_values().collect();
    offers.sort_by(by_price);
    offers
}

// An offer paired with its hotel metadata, when enrichment has it
#[derive(Debug, Clone, PartialEq)]
pub struct TourWithHotel {
    pub offer: PriceOffer,
    pub hotel: Option<Hotel>,
}

pub fn join_hotels(offers: &[PriceOffer], hotels: &HotelsMap) -> Vec<TourWithHotel> {
    let mut tours: Vec<TourWithHotel> = offers
        .iter()
        .map(|offer| TourWithHotel {
            offer: offer.clone(),
            hotel: offer
                .hotel_id
                .as_ref()
                .and_then(|hotel_id| hotels.get(hotel_id))
                .cloned(),
        })
        .collect();
    tours.sort_by(|a, b| by_price(&a.offer, &b.offer));
    tours
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_offer_wire_format() {
        let json = r#"{
            "id": "off-1",
            "amount": 1250.5,
            "currency": "usd",
            "startDate": "2025-07-01",
            "endDate": "2025-07-10",
            "hotelID": "42"
        }"#;

        let offer: PriceOffer = serde_json::from_str(json).unwrap();
        assert_eq!(offer.amount, 1250.5);
        assert_eq!(offer.hotel_id.as_deref(), Some("42"));
        assert_eq!(offer.start_date, NaiveDate::from_ymd_opt(2025, 7, 1).unwrap());

        let without_hotel = r#"{"id":"off-2","amount":1,"currency":"usd","startDate":"2025-07-01","endDate":"2025-07-02"}"#;
        let offer: PriceOffer = serde_json::from_str(without_hotel).unwrap();
        assert!(offer.hotel_id.is_none());
    }

    #[test]
    fn test_geo_entity_destination() {
        let json = r#"{
            "115": {"type": "country", "id": "115", "name": "Ukraine", "flag": "ua.png"},
            "7953": {"type": "city", "id": 7953, "name": "Bukovel", "countryId": "115"},
            "8000": {"type": "city", "id": 8000, "name": "Nowhere"},
            "9": {"type": "hotel", "id": 9, "name": "Radisson", "img": "x.jpg",
                  "cityId": 7953, "cityName": "Bukovel", "countryId": "115", "countryName": "Ukraine"}
        }"#;

        let geo: GeoResponse = serde_json::from_str(json).unwrap();
        assert_eq!(geo["115"].destination_id(), Some("115"));
        assert_eq!(geo["7953"].destination_id(), Some("115"));
        assert_eq!(geo["8000"].destination_id(), None);
        assert_eq!(geo["9"].destination_id(), Some("115"));
    }

    #[test]
    fn test_sorted_by_price() {
        let sorted = sorted_by_price(prices(vec![
            offer("c", 900.0, None),
            offer("a", 300.0, None),
            offer("b", 300.0, None),
        ]));

        let ids: Vec<&str> = sorted.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_join_hotels_keeps_unmatched_offers() {
        let offers = vec![offer("x", 700.0, Some("1")), offer("y", 200.0, Some("404"))];
        let hotels = hotels(vec![hotel(1, "115")]);

        let tours = join_hotels(&offers, &hotels);
        assert_eq!(tours.len(), 2);
        assert_eq!(tours[0].offer.id, "y");
        assert!(tours[0].hotel.is_none());
        assert_eq!(tours[1].hotel.as_ref().map(|h| h.id), Some(1));
    }
}

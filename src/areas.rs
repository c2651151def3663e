// src/areas.rs
//
// Chennai area / pincode lookup used by the enquiry form's autocomplete.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Area {
    pub area: &'static str,
    pub pincode: &'static str,
}

pub static CHENNAI_AREAS: &[Area] = &[
    Area { area: "Ambattur", pincode: "600053" },
    Area { area: "Ambattur Industrial Estate", pincode: "600058" },
    Area { area: "Avadi", pincode: "600054" },
    Area { area: "Aynavaram", pincode: "600023" },
    Area { area: "Ayanavaram", pincode: "600023" },
    Area { area: "Kolathur", pincode: "600099" },
    Area { area: "Korattur", pincode: "600080" },
    Area { area: "Madhavaram", pincode: "600060" },
    Area { area: "Manali", pincode: "600068" },
    Area { area: "Mogappair", pincode: "600037" },
    Area { area: "Mogappair East", pincode: "600037" },
    Area { area: "Mogappair West", pincode: "600050" },
    Area { area: "Perambur", pincode: "600011" },
    Area { area: "Puzhal", pincode: "600066" },
    Area { area: "Red Hills", pincode: "600052" },
    Area { area: "Tiruvottiyur", pincode: "600019" },
    Area { area: "Tondiarpet", pincode: "600081" },
    Area { area: "Washermanpet", pincode: "600021" },
    Area { area: "Alandur", pincode: "600016" },
    Area { area: "Aminjikarai", pincode: "600029" },
    Area { area: "Anna Nagar", pincode: "600040" },
    Area { area: "Anna Nagar East", pincode: "600102" },
    Area { area: "Anna Nagar West", pincode: "600040" },
    Area { area: "Annanagar", pincode: "600040" },
    Area { area: "Arumbakkam", pincode: "600106" },
    Area { area: "Ashok Nagar", pincode: "600083" },
    Area { area: "Choolaimedu", pincode: "600094" },
    Area { area: "Chetpet", pincode: "600031" },
    Area { area: "Egmore", pincode: "600008" },
    Area { area: "Gopalapuram", pincode: "600086" },
    Area { area: "Kodambakkam", pincode: "600024" },
    Area { area: "Koyambedu", pincode: "600107" },
    Area { area: "Kilpauk", pincode: "600010" },
    Area { area: "Nungambakkam", pincode: "600034" },
    Area { area: "Saidapet", pincode: "600015" },
    Area { area: "T Nagar", pincode: "600017" },
    Area { area: "T. Nagar", pincode: "600017" },
    Area { area: "Teynampet", pincode: "600018" },
    Area { area: "Vadapalani", pincode: "600026" },
    Area { area: "Villivakkam", pincode: "600049" },
    Area { area: "Virugambakkam", pincode: "600092" },
    Area { area: "Adambakkam", pincode: "600088" },
    Area { area: "Adyar", pincode: "600020" },
    Area { area: "Alwarpet", pincode: "600018" },
    Area { area: "Besant Nagar", pincode: "600090" },
    Area { area: "Chitlapakkam", pincode: "600064" },
    Area { area: "Chromepet", pincode: "600044" },
    Area { area: "Ekkattuthangal", pincode: "600032" },
    Area { area: "Guindy", pincode: "600032" },
    Area { area: "Jafferkhanpet", pincode: "600083" },
    Area { area: "Keelkattalai", pincode: "600117" },
    Area { area: "Kotturpuram", pincode: "600085" },
    Area { area: "Madipakkam", pincode: "600091" },
    Area { area: "Mandaveli", pincode: "600028" },
    Area { area: "Medavakkam", pincode: "600100" },
    Area { area: "Meenambakkam", pincode: "600027" },
    Area { area: "Mylapore", pincode: "600004" },
    Area { area: "Nanganallur", pincode: "600061" },
    Area { area: "Pallavaram", pincode: "600043" },
    Area { area: "Pallikaranai", pincode: "600100" },
    Area { area: "Pammal", pincode: "600075" },
    Area { area: "Perungudi", pincode: "600096" },
    Area { area: "Palavakkam", pincode: "600041" },
    Area { area: "Selaiyur", pincode: "600073" },
    Area { area: "Sembakkam", pincode: "600073" },
    Area { area: "St. Thomas Mount", pincode: "600016" },
    Area { area: "Tambaram", pincode: "600045" },
    Area { area: "Tambaram East", pincode: "600059" },
    Area { area: "Thiruvanmiyur", pincode: "600041" },
    Area { area: "Tirusulam", pincode: "600016" },
    Area { area: "Velachery", pincode: "600042" },
    Area { area: "KK Nagar", pincode: "600078" },
    Area { area: "K.K. Nagar", pincode: "600078" },
    Area { area: "Kattupakkam", pincode: "600056" },
    Area { area: "Maduravoyal", pincode: "600095" },
    Area { area: "Mangadu", pincode: "600122" },
    Area { area: "Nandambakkam", pincode: "600089" },
    Area { area: "Nerkundram", pincode: "600107" },
    Area { area: "Porur", pincode: "600116" },
    Area { area: "Poonamallee", pincode: "600056" },
    Area { area: "Ramapuram", pincode: "600089" },
    Area { area: "Saligramam", pincode: "600093" },
    Area { area: "Valasaravakkam", pincode: "600087" },
    Area { area: "Egattur", pincode: "603103" },
    Area { area: "Injambakkam", pincode: "600115" },
    Area { area: "Karapakkam", pincode: "600097" },
    Area { area: "Kelambakkam", pincode: "603103" },
    Area { area: "Navalur", pincode: "603103" },
    Area { area: "Neelankarai", pincode: "600041" },
    Area { area: "Okkiyam Thoraipakkam", pincode: "600097" },
    Area { area: "Padur", pincode: "603103" },
    Area { area: "Perumbakkam", pincode: "600100" },
    Area { area: "Sholinganallur", pincode: "600119" },
    Area { area: "Siruseri", pincode: "603103" },
    Area { area: "Semmancheri", pincode: "600119" },
    Area { area: "Tharamani", pincode: "600113" },
    Area { area: "Thoraipakkam", pincode: "600097" },
    Area { area: "Taramani", pincode: "600113" },
    Area { area: "Ennore", pincode: "600057" },
    Area { area: "Kathivakkam", pincode: "600019" },
    Area { area: "Minjur", pincode: "601203" },
    Area { area: "Chengalpattu", pincode: "603001" },
    Area { area: "Maraimalai Nagar", pincode: "603209" },
    Area { area: "Urapakkam", pincode: "603210" },
    Area { area: "Guduvancheri", pincode: "603202" },
    Area { area: "Vandalur", pincode: "600048" },
];

/// Case-insensitive substring match on the area name, or prefix match on the pincode.
/// A blank query returns the whole table.
pub fn search_areas(query: &str) -> Vec<Area> {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return CHENNAI_AREAS.to_vec();
    }
    CHENNAI_AREAS
        .iter()
        .filter(|a| a.area.to_lowercase().contains(&q) || a.pincode.starts_with(&q))
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_query_returns_everything() {
        assert_eq!(search_areas("  ").len(), CHENNAI_AREAS.len());
    }

    #[test]
    fn test_area_substring_is_case_insensitive() {
        let hits = search_areas("anna nagar");
        assert!(hits.iter().any(|a| a.area == "Anna Nagar East"));
        assert!(hits.iter().all(|a| a.area.to_lowercase().contains("anna nagar")));
    }

    #[test]
    fn test_pincode_prefix() {
        let hits = search_areas("60002");
        assert!(hits.iter().any(|a| a.area == "Adyar"));
        assert!(hits.iter().all(|a| a.pincode.starts_with("60002")));
        assert!(search_areas("999").is_empty());
    }
}

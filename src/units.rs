/// Measurement units and conversion to a desired unit.
///
/// Names are matched case-insensitively against the official unit names and
/// their common aliases (CFS, CMS, FT, ...). A conversion is a linear map
/// `value * factor + offset`, which covers scaled units and the offset
/// temperature scales alike.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{RetrievalError, UnitError};
use crate::store::caches::MeasurementUnitCache;

// ---------------------------------------------------------------------------
// Unit table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    VolumeFlow,
    Volume,
    Length,
    Speed,
    Temperature,
}

/// A unit expressed against its dimension's base unit:
/// `base = value * scale + offset`.
#[derive(Debug)]
pub struct UnitDefinition {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub dimension: Dimension,
    pub scale: f64,
    pub offset: f64,
}

const CUBIC_FOOT_IN_CUBIC_METERS: f64 = 0.028316846592;
const FAHRENHEIT_SCALE: f64 = 5.0 / 9.0;

const UNITS: &[UnitDefinition] = &[
    // Volume flow, base m3/s
    UnitDefinition { name: "m3/s", aliases: &["CMS", "m^3/s", "m3 s-1"], dimension: Dimension::VolumeFlow, scale: 1.0, offset: 0.0 },
    UnitDefinition { name: "[ft_i]3/s", aliases: &["CFS", "ft3/s", "ft^3/s"], dimension: Dimension::VolumeFlow, scale: CUBIC_FOOT_IN_CUBIC_METERS, offset: 0.0 },
    UnitDefinition { name: "k[ft_i]3/s", aliases: &["KCFS", "kft3/s"], dimension: Dimension::VolumeFlow, scale: CUBIC_FOOT_IN_CUBIC_METERS * 1000.0, offset: 0.0 },
    UnitDefinition { name: "[gal_us]/min", aliases: &["gal/min", "GPM"], dimension: Dimension::VolumeFlow, scale: 0.003785411784 / 60.0, offset: 0.0 },
    UnitDefinition { name: "[Mgal_us]/d", aliases: &["MGD"], dimension: Dimension::VolumeFlow, scale: 3785.411784 / 86400.0, offset: 0.0 },
    // Volume, base m3
    UnitDefinition { name: "m3", aliases: &["m^3"], dimension: Dimension::Volume, scale: 1.0, offset: 0.0 },
    UnitDefinition { name: "[ft_i]3", aliases: &["ft3", "ft^3"], dimension: Dimension::Volume, scale: CUBIC_FOOT_IN_CUBIC_METERS, offset: 0.0 },
    UnitDefinition { name: "[acr_us].[ft_i]", aliases: &["ac-ft", "acre-ft", "AF"], dimension: Dimension::Volume, scale: 1233.48183754752, offset: 0.0 },
    // Length, base m
    UnitDefinition { name: "m", aliases: &["meters", "meter"], dimension: Dimension::Length, scale: 1.0, offset: 0.0 },
    UnitDefinition { name: "km", aliases: &["kilometers"], dimension: Dimension::Length, scale: 1000.0, offset: 0.0 },
    UnitDefinition { name: "cm", aliases: &["centimeters"], dimension: Dimension::Length, scale: 0.01, offset: 0.0 },
    UnitDefinition { name: "mm", aliases: &["millimeters"], dimension: Dimension::Length, scale: 0.001, offset: 0.0 },
    UnitDefinition { name: "[ft_i]", aliases: &["FT", "feet", "foot"], dimension: Dimension::Length, scale: 0.3048, offset: 0.0 },
    UnitDefinition { name: "[in_i]", aliases: &["IN", "inches", "inch"], dimension: Dimension::Length, scale: 0.0254, offset: 0.0 },
    // Speed and precipitation rate, base m/s
    UnitDefinition { name: "m/s", aliases: &["mps"], dimension: Dimension::Speed, scale: 1.0, offset: 0.0 },
    UnitDefinition { name: "km/h", aliases: &["kph"], dimension: Dimension::Speed, scale: 1.0 / 3.6, offset: 0.0 },
    UnitDefinition { name: "[ft_i]/s", aliases: &["ft/s", "fps"], dimension: Dimension::Speed, scale: 0.3048, offset: 0.0 },
    UnitDefinition { name: "[mi_i]/h", aliases: &["mph"], dimension: Dimension::Speed, scale: 0.44704, offset: 0.0 },
    UnitDefinition { name: "mm/s", aliases: &["kg/m2/s", "kg m-2 s-1"], dimension: Dimension::Speed, scale: 0.001, offset: 0.0 },
    UnitDefinition { name: "mm/h", aliases: &["mm/hr"], dimension: Dimension::Speed, scale: 0.001 / 3600.0, offset: 0.0 },
    UnitDefinition { name: "mm/d", aliases: &["mm/day"], dimension: Dimension::Speed, scale: 0.001 / 86400.0, offset: 0.0 },
    UnitDefinition { name: "[in_i]/h", aliases: &["in/hr", "in/h"], dimension: Dimension::Speed, scale: 0.0254 / 3600.0, offset: 0.0 },
    // Temperature, base K
    UnitDefinition { name: "K", aliases: &["kelvin"], dimension: Dimension::Temperature, scale: 1.0, offset: 0.0 },
    UnitDefinition { name: "Cel", aliases: &["C", "degC", "celsius"], dimension: Dimension::Temperature, scale: 1.0, offset: 273.15 },
    UnitDefinition { name: "[degF]", aliases: &["F", "degF", "fahrenheit"], dimension: Dimension::Temperature, scale: FAHRENHEIT_SCALE, offset: 273.15 - 32.0 * FAHRENHEIT_SCALE },
];

/// Finds a unit by official name or alias, ignoring case and surrounding
/// whitespace.
pub fn find_unit(name: &str) -> Option<&'static UnitDefinition> {
    let name = name.trim();
    UNITS.iter().find(|unit| {
        unit.name.eq_ignore_ascii_case(name) || unit.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    })
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

/// A pure function from a source unit to the desired unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitConversion {
    pub factor: f64,
    pub offset: f64,
}

impl UnitConversion {
    pub fn identity() -> Self {
        UnitConversion { factor: 1.0, offset: 0.0 }
    }

    pub fn between(from: &UnitDefinition, to: &UnitDefinition) -> Result<Self, UnitError> {
        if from.dimension != to.dimension {
            return Err(UnitError::NoUnitConversion(format!(
                "cannot convert {} ({:?}) to {} ({:?})",
                from.name, from.dimension, to.name, to.dimension
            )));
        }
        Ok(UnitConversion {
            factor: from.scale / to.scale,
            offset: (from.offset - to.offset) / to.scale,
        })
    }

    pub fn apply(&self, value: f64) -> f64 {
        value * self.factor + self.offset
    }
}

// ---------------------------------------------------------------------------
// Unit mapper
// ---------------------------------------------------------------------------

/// Converts values from any stored unit to one desired unit.
///
/// Converters are resolved on first use and cached per source unit, so the
/// mapper can be shared across pools behind an `Arc`.
pub struct UnitMapper {
    desired_unit: String,
    /// Declared alias (lowercase) to unit name.
    aliases: HashMap<String, String>,
    unit_cache: Arc<MeasurementUnitCache>,
    converters: Mutex<HashMap<String, UnitConversion>>,
}

impl UnitMapper {
    pub fn of(unit_cache: Arc<MeasurementUnitCache>, desired_unit: &str) -> Result<Self, UnitError> {
        Self::with_aliases(unit_cache, desired_unit, HashMap::new())
    }

    /// Declared aliases map a name to the unit it stands for and take
    /// precedence over the built-in aliases.
    pub fn with_aliases(
        unit_cache: Arc<MeasurementUnitCache>,
        desired_unit: &str,
        aliases: HashMap<String, String>,
    ) -> Result<Self, UnitError> {
        if desired_unit.trim().is_empty() {
            return Err(UnitError::NoUnitConversion(
                "the desired measurement unit is blank".to_string(),
            ));
        }
        Ok(UnitMapper {
            desired_unit: desired_unit.trim().to_string(),
            aliases: aliases
                .into_iter()
                .map(|(alias, unit)| (alias.trim().to_ascii_lowercase(), unit))
                .collect(),
            unit_cache,
            converters: Mutex::new(HashMap::new()),
        })
    }

    pub fn desired_unit_name(&self) -> &str {
        &self.desired_unit
    }

    /// Converter from the named unit to the desired unit.
    pub fn get_unit_mapper(&self, unit_name: &str) -> Result<UnitConversion, UnitError> {
        let key = unit_name.trim().to_ascii_lowercase();
        if let Some(conversion) = self.converters.lock().get(&key) {
            return Ok(*conversion);
        }

        let from = self.resolve(unit_name)?;
        let to = self.resolve(&self.desired_unit)?;
        let conversion = UnitConversion::between(from, to)?;
        log::debug!(
            "resolved conversion from {} to {}: x * {} + {}",
            from.name,
            to.name,
            conversion.factor,
            conversion.offset
        );

        self.converters.lock().insert(key, conversion);
        Ok(conversion)
    }

    /// Converter for a stored measurement-unit id.
    pub fn get_unit_mapper_by_id(&self, unit_id: i64) -> Result<UnitConversion, RetrievalError> {
        let name = self.unit_cache.name_of(unit_id)?;
        Ok(self.get_unit_mapper(&name)?)
    }

    fn resolve(&self, unit_name: &str) -> Result<&'static UnitDefinition, UnitError> {
        let declared = self.aliases.get(&unit_name.trim().to_ascii_lowercase());
        let name = declared.map(String::as_str).unwrap_or(unit_name);
        find_unit(name).ok_or_else(|| {
            UnitError::NoUnitConversion(format!("unrecognized measurement unit '{}'", unit_name))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn unit_cache() -> Arc<MeasurementUnitCache> {
        let store = MemoryStore::new();
        store.add_unit(1, "CFS");
        store.add_unit(2, "degF");
        Arc::new(MeasurementUnitCache::new(Arc::new(store)))
    }

    #[test]
    fn test_blank_desired_unit_is_rejected() {
        for blank in ["", "   "] {
            let result = UnitMapper::of(unit_cache(), blank);
            assert!(
                matches!(result, Err(UnitError::NoUnitConversion(_))),
                "Desired unit {:?} should be rejected",
                blank
            );
        }
    }

    #[test]
    fn test_cfs_to_cms() {
        let mapper = UnitMapper::of(unit_cache(), "CMS").unwrap();
        let conversion = mapper.get_unit_mapper("CFS").unwrap();
        assert!((conversion.apply(35.3147) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_unit_names_ignore_case() {
        let mapper = UnitMapper::of(unit_cache(), "CMS").unwrap();
        let upper = mapper.get_unit_mapper("CFS").unwrap();
        let lower = mapper.get_unit_mapper("cfs").unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.apply(100.0), lower.apply(100.0));
    }

    #[test]
    fn test_converters_cached_per_source_unit() {
        let store = Arc::new(MemoryStore::new());
        store.add_unit(1, "CFS");
        let mapper = UnitMapper::of(Arc::new(MeasurementUnitCache::new(store.clone())), "CMS").unwrap();

        mapper.get_unit_mapper("CFS").unwrap();
        mapper.get_unit_mapper("cfs").unwrap();
        assert_eq!(mapper.converters.lock().len(), 1, "Both spellings should share one converter");

        mapper.get_unit_mapper_by_id(1).unwrap();
        mapper.get_unit_mapper_by_id(1).unwrap();
        assert_eq!(store.lookup_count(), 1, "The stored unit name should be looked up once");
        assert_eq!(mapper.converters.lock().len(), 1);
    }

    #[test]
    fn test_official_names_and_aliases_agree() {
        let mapper = UnitMapper::of(unit_cache(), "m3/s").unwrap();
        let official = mapper.get_unit_mapper("[ft_i]3/s").unwrap();
        let alias = mapper.get_unit_mapper("ft3/s").unwrap();
        assert!((official.apply(1.0) - alias.apply(1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_temperature_offsets() {
        let mapper = UnitMapper::of(unit_cache(), "C").unwrap();
        let conversion = mapper.get_unit_mapper("F").unwrap();
        assert!((conversion.apply(212.0) - 100.0).abs() < 1e-9);
        assert!((conversion.apply(32.0)).abs() < 1e-9);
    }

    #[test]
    fn test_incompatible_dimensions_fail() {
        let mapper = UnitMapper::of(unit_cache(), "CMS").unwrap();
        assert!(matches!(
            mapper.get_unit_mapper("FT"),
            Err(UnitError::NoUnitConversion(_))
        ));
    }

    #[test]
    fn test_unknown_unit_fails_at_first_use() {
        let mapper = UnitMapper::of(unit_cache(), "furlongs per fortnight").unwrap();
        assert!(mapper.get_unit_mapper("CFS").is_err());
    }

    #[test]
    fn test_conversion_by_stored_id() {
        let mapper = UnitMapper::of(unit_cache(), "Cel").unwrap();
        let conversion = mapper.get_unit_mapper_by_id(2).unwrap();
        assert!((conversion.apply(50.0) - 10.0).abs() < 1e-9);
        assert!(matches!(
            mapper.get_unit_mapper_by_id(99),
            Err(RetrievalError::MissingIdentity(_))
        ));
    }

    #[test]
    fn test_declared_alias_overrides_builtin() {
        let mut aliases = HashMap::new();
        aliases.insert("flow".to_string(), "[ft_i]3/s".to_string());
        let mapper = UnitMapper::with_aliases(unit_cache(), "CMS", aliases).unwrap();
        let conversion = mapper.get_unit_mapper("FLOW").unwrap();
        assert!((conversion.apply(35.3147) - 1.0).abs() < 1e-5);
    }
}
